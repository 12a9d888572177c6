//! Join clauses.
//!
//! A [`JoinClause`] introduces a query source into the body of a query model:
//! `join <Type> <name> in <source>`, optionally restricted by `with` predicates.
//! Joins start out as outer joins and may be promoted to inner joins (see
//! [`WhereJoinDetector`](crate::optimizer::WhereJoinDetector)); a join never goes
//! back from inner to outer.

use crate::clause::{FromClause, WithClause, validate_expression, validate_item_name};
use crate::expr::Expr;
use crate::model::QueryModel;
use crate::source::{CloneContext, ItemType, QuerySourceId};
use crate::visitor::QueryModelVisitor;
use quarry_core::Result;
use std::fmt;

/// A join over a query source.
#[derive(Debug, PartialEq)]
pub struct JoinClause {
    id: QuerySourceId,
    item_name: String,
    item_type: ItemType,
    source: Expr,
    restrictions: Vec<WithClause>,
    is_inner: bool,
}

impl JoinClause {
    /// Create an outer join without restrictions.
    pub fn new(item_name: impl Into<String>, item_type: ItemType, source: Expr) -> Result<Self> {
        Self::with_restrictions(item_name, item_type, source, Vec::new())
    }

    /// Create an outer join with the given restrictions, kept in order.
    pub fn with_restrictions(
        item_name: impl Into<String>,
        item_type: ItemType,
        source: Expr,
        restrictions: Vec<WithClause>,
    ) -> Result<Self> {
        let item_name = item_name.into();
        validate_item_name(&item_name)?;
        validate_expression("source", &source)?;
        Ok(Self {
            id: QuerySourceId::fresh(),
            item_name,
            item_type,
            source,
            restrictions,
            is_inner: false,
        })
    }

    pub fn id(&self) -> QuerySourceId {
        self.id
    }

    pub fn item_name(&self) -> &str {
        &self.item_name
    }

    pub fn item_type(&self) -> &ItemType {
        &self.item_type
    }

    pub fn source(&self) -> &Expr {
        &self.source
    }

    pub fn restrictions(&self) -> &[WithClause] {
        &self.restrictions
    }

    pub fn is_inner(&self) -> bool {
        self.is_inner
    }

    /// Reference to a member of the joined items.
    pub fn member(&self, name: impl Into<String>) -> Expr {
        Expr::member(self.id, name)
    }

    /// Reference to the joined items themselves.
    pub fn items(&self) -> Expr {
        Expr::source(self.id)
    }

    pub fn set_item_name(&mut self, item_name: impl Into<String>) -> Result<()> {
        let item_name = item_name.into();
        validate_item_name(&item_name)?;
        self.item_name = item_name;
        Ok(())
    }

    /// Replace the item type.
    ///
    /// Expressions elsewhere in the model that relied on members of the old type are
    /// not revisited.
    pub fn set_item_type(&mut self, item_type: ItemType) {
        self.item_type = item_type;
    }

    pub fn set_source(&mut self, source: Expr) -> Result<()> {
        validate_expression("source", &source)?;
        self.source = source;
        Ok(())
    }

    /// Append a restriction after the existing ones.
    pub fn add_restriction(&mut self, restriction: WithClause) {
        self.restrictions.push(restriction);
    }

    /// Promote to an inner join. Idempotent.
    pub fn make_inner(&mut self) {
        self.is_inner = true;
    }

    /// Apply `f` to every restriction predicate, in order, and then to the source.
    ///
    /// Every result is validated before anything is stored: if `f` fails or yields an
    /// empty fragment, the clause is left as it was.
    pub fn transform_expressions<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&Expr) -> Result<Expr>,
    {
        let mut predicates = Vec::with_capacity(self.restrictions.len());
        for restriction in &self.restrictions {
            let predicate = f(restriction.predicate())?;
            validate_expression("predicate", &predicate)?;
            predicates.push(predicate);
        }
        let source = f(&self.source)?;
        validate_expression("source", &source)?;

        for (restriction, predicate) in self.restrictions.iter_mut().zip(predicates) {
            restriction.set_predicate(predicate);
        }
        self.source = source;
        Ok(())
    }

    /// Deep copy with a fresh identity.
    ///
    /// The mapping from this clause to the copy is registered in `ctx` before the
    /// restrictions are copied, so restrictions that refer to this join refer to the
    /// copy instead. References to sources already in `ctx` are redirected too.
    pub fn clone_with(&self, ctx: &mut CloneContext) -> Self {
        let id = QuerySourceId::fresh();
        ctx.add_mapping(self.id, id);

        let mut source = self.source.clone();
        source.remap_sources(ctx);
        let restrictions = self
            .restrictions
            .iter()
            .map(|r| r.clone_with(ctx))
            .collect();

        Self {
            id,
            item_name: self.item_name.clone(),
            item_type: self.item_type.clone(),
            source,
            restrictions,
            is_inner: self.is_inner,
        }
    }

    /// Take name, type and source from a from clause, keeping identity and restrictions.
    pub fn copy_from_source(&mut self, from: &FromClause) {
        self.item_name = from.item_name().to_string();
        self.item_type = from.item_type().clone();
        self.source = from.source().clone();
    }

    pub fn accept<V>(&self, visitor: &mut V, model: &QueryModel, index: usize) -> Result<()>
    where
        V: QueryModelVisitor + ?Sized,
    {
        visitor.visit_join_clause(self, model, index)
    }
}

impl fmt::Display for JoinClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "join {} {} in {}",
            self.item_type, self.item_name, self.source
        )?;
        for restriction in &self.restrictions {
            write!(f, " {restriction}")?;
        }
        Ok(())
    }
}
