//! The query model: a clause-structured representation of a parsed query.

use crate::clause::{BodyClause, FromClause, ResultOperator, SelectClause};
use crate::expr::Expr;
use crate::source::{CloneContext, QuerySourceId};
use crate::visitor::QueryModelVisitor;
use quarry_core::Result;
use std::fmt;

/// A parsed query: main from clause, ordered body clauses, select clause and result
/// operators.
///
/// Body clause order is declaration order and is significant: the join optimizer only
/// looks at where clauses declared after a join, and serialization preserves it.
#[derive(Debug, PartialEq)]
pub struct QueryModel {
    main_from: FromClause,
    body_clauses: Vec<BodyClause>,
    select: SelectClause,
    result_operators: Vec<ResultOperator>,
}

impl QueryModel {
    pub fn new(main_from: FromClause, select: SelectClause) -> Self {
        Self {
            main_from,
            body_clauses: Vec::new(),
            select,
            result_operators: Vec::new(),
        }
    }

    /// Model selecting the items of its main from clause.
    pub fn select_items(main_from: FromClause) -> Self {
        let select = SelectClause::for_source(main_from.id());
        Self::new(main_from, select)
    }

    pub fn main_from(&self) -> &FromClause {
        &self.main_from
    }

    pub fn body_clauses(&self) -> &[BodyClause] {
        &self.body_clauses
    }

    pub fn body_clauses_mut(&mut self) -> &mut [BodyClause] {
        &mut self.body_clauses
    }

    pub fn select_clause(&self) -> &SelectClause {
        &self.select
    }

    pub fn set_select_clause(&mut self, select: SelectClause) {
        self.select = select;
    }

    pub fn result_operators(&self) -> &[ResultOperator] {
        &self.result_operators
    }

    /// Append a body clause; returns its index.
    pub fn add_body_clause(&mut self, clause: impl Into<BodyClause>) -> usize {
        self.body_clauses.push(clause.into());
        self.body_clauses.len() - 1
    }

    pub fn add_result_operator(&mut self, op: ResultOperator) {
        self.result_operators.push(op);
    }

    /// Builder-style variant of [`add_body_clause`](Self::add_body_clause).
    pub fn with_body_clause(mut self, clause: impl Into<BodyClause>) -> Self {
        self.add_body_clause(clause);
        self
    }

    /// Builder-style variant of [`add_result_operator`](Self::add_result_operator).
    pub fn with_result_operator(mut self, op: ResultOperator) -> Self {
        self.add_result_operator(op);
        self
    }

    /// Every query source of the model in declaration order, main from clause first.
    pub fn query_sources(&self) -> Vec<(QuerySourceId, &str)> {
        let mut sources = vec![(self.main_from.id(), self.main_from.item_name())];
        sources.extend(self.body_clauses.iter().filter_map(BodyClause::query_source));
        sources
    }

    /// Whether `id` names a query source declared by this model.
    pub fn declares(&self, id: QuerySourceId) -> bool {
        self.query_sources().iter().any(|(s, _)| *s == id)
    }

    /// Deep copy with fresh identities for every query source.
    ///
    /// Clauses are copied in declaration order; references between them are redirected
    /// to the copies through `ctx`.
    pub fn clone_with(&self, ctx: &mut CloneContext) -> Self {
        let main_from = self.main_from.clone_with(ctx);
        let body_clauses = self
            .body_clauses
            .iter()
            .map(|c| c.clone_with(ctx))
            .collect();
        Self {
            main_from,
            body_clauses,
            select: self.select.clone_with(ctx),
            result_operators: self.result_operators.clone(),
        }
    }

    /// Apply `f` to every expression of the model, clause by clause.
    ///
    /// Each clause is updated atomically; on failure, clauses before the failing one
    /// keep their new expressions.
    pub fn transform_expressions<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&Expr) -> Result<Expr>,
    {
        self.main_from.transform_expressions(&mut f)?;
        for clause in &mut self.body_clauses {
            clause.transform_expressions(&mut f)?;
        }
        self.select.transform_expressions(&mut f)
    }

    /// Walk the model with `visitor`.
    pub fn accept<V>(&self, visitor: &mut V) -> Result<()>
    where
        V: QueryModelVisitor + ?Sized,
    {
        visitor.visit_query_model(self)
    }
}

impl fmt::Display for QueryModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.main_from)?;
        for clause in &self.body_clauses {
            write!(f, " {clause}")?;
        }
        write!(f, " {}", self.select)?;
        for op in &self.result_operators {
            write!(f, ".{op}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::{WhereClause, WithClause};
    use crate::join::JoinClause;
    use crate::source::ItemType;

    fn sample() -> QueryModel {
        let c = FromClause::entities("c", ItemType::new("Customer").unwrap()).unwrap();
        let join = JoinClause::new("o", ItemType::new("Order").unwrap(), c.member("orders")).unwrap();
        let predicate = join.member("total").gt(100);
        let mut model = QueryModel::select_items(c);
        model.add_body_clause(join);
        model.add_body_clause(WhereClause::new(predicate).unwrap());
        model
    }

    #[test]
    fn test_query_sources_in_declaration_order() {
        let model = sample();
        let names: Vec<&str> = model.query_sources().iter().map(|(_, n)| *n).collect();
        assert_eq!(names, vec!["c", "o"]);
        assert!(model.declares(model.main_from().id()));
        assert!(!model.declares(QuerySourceId::fresh()));
    }

    #[test]
    fn test_clone_with_redirects_every_reference() {
        let model = sample();
        let mut ctx = CloneContext::new();
        let clone = model.clone_with(&mut ctx);

        assert_eq!(ctx.len(), 2);
        assert_ne!(clone.main_from().id(), model.main_from().id());

        let BodyClause::Join(join) = &clone.body_clauses()[0] else {
            panic!("expected join");
        };
        assert!(join.source().references(clone.main_from().id()));

        let BodyClause::Where(where_clause) = &clone.body_clauses()[1] else {
            panic!("expected where");
        };
        assert!(where_clause.predicate().references(join.id()));
        assert!(clone.select_clause().selector().references(clone.main_from().id()));

        for (id, _) in clone.query_sources() {
            assert!(!model.declares(id));
        }
    }

    #[test]
    fn test_transform_expressions_reaches_all_clauses() {
        let mut model = sample();
        let mut count = 0;
        model
            .transform_expressions(|e| {
                count += 1;
                Ok(e.clone())
            })
            .unwrap();
        // main from source, join source, where predicate, selector
        assert_eq!(count, 4);
    }

    #[test]
    fn test_display() {
        let mut model = sample();
        if let BodyClause::Join(join) = &mut model.body_clauses_mut()[0] {
            join.add_restriction(WithClause::new(Expr::col("x").is_not_null()).unwrap());
        }
        let text = model.to_string();
        assert!(text.starts_with("from Customer c in Customer join Order o in ["));
        assert!(text.contains("with x IS NOT NULL where ["));
        assert!(text.contains("].total > 100 select ["));
        assert!(text.ends_with(']'));
    }
}
