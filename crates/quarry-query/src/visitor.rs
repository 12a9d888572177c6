//! Query model traversal and serialization to query text.

use crate::clause::{
    FromClause, GroupJoinClause, OrderByClause, OrderDirection, Ordering, ResultOperator,
    SelectClause, WhereClause,
};
use crate::expr::{BinaryOp, BuildContext, Expr};
use crate::join::JoinClause;
use crate::model::QueryModel;
use crate::optimizer::WhereJoinDetector;
use quarry_core::{Dialect, Error, Result, Value};
use tracing::trace;

/// Visitor over the clauses of a [`QueryModel`].
///
/// [`visit_query_model`](Self::visit_query_model) drives the traversal in declaration
/// order: main from clause, body clauses by index, select clause, result operators.
/// Every other method defaults to doing nothing.
pub trait QueryModelVisitor {
    fn visit_query_model(&mut self, model: &QueryModel) -> Result<()> {
        self.visit_main_from_clause(model.main_from(), model)?;
        for (index, clause) in model.body_clauses().iter().enumerate() {
            clause.accept(self, model, index)?;
        }
        self.visit_select_clause(model.select_clause(), model)?;
        for (index, op) in model.result_operators().iter().enumerate() {
            self.visit_result_operator(op, model, index)?;
        }
        Ok(())
    }

    fn visit_main_from_clause(&mut self, _clause: &FromClause, _model: &QueryModel) -> Result<()> {
        Ok(())
    }

    fn visit_additional_from_clause(
        &mut self,
        _clause: &FromClause,
        _model: &QueryModel,
        _index: usize,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_join_clause(
        &mut self,
        _clause: &JoinClause,
        _model: &QueryModel,
        _index: usize,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_group_join_clause(
        &mut self,
        _clause: &GroupJoinClause,
        _model: &QueryModel,
        _index: usize,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_where_clause(
        &mut self,
        _clause: &WhereClause,
        _model: &QueryModel,
        _index: usize,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_order_by_clause(
        &mut self,
        _clause: &OrderByClause,
        _model: &QueryModel,
        _index: usize,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_select_clause(&mut self, _clause: &SelectClause, _model: &QueryModel) -> Result<()> {
        Ok(())
    }

    fn visit_result_operator(
        &mut self,
        _op: &ResultOperator,
        _model: &QueryModel,
        _index: usize,
    ) -> Result<()> {
        Ok(())
    }
}

/// Query text plus the parameters bound to its placeholders, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub text: String,
    pub params: Vec<Value>,
}

/// An item of the from list after the main from clause.
#[derive(Debug)]
enum FromItem {
    Join {
        inner: bool,
        name: String,
        source: Expr,
        restrictions: Vec<Expr>,
    },
    Cross {
        item_type: String,
        name: String,
        source: Expr,
    },
}

/// Serializes a query model into query text for a [`Dialect`].
///
/// Visiting collects the clauses; they are rendered afterwards in textual
/// order so that placeholders are numbered in the order they appear. Member
/// references resolve against every query source the model declares.
#[derive(Debug)]
pub struct QueryTextGenerator {
    ctx: BuildContext,
    main_from: Option<(String, String)>,
    from_items: Vec<FromItem>,
    predicates: Vec<Expr>,
    orderings: Vec<Ordering>,
    selector: Option<Expr>,
    distinct: bool,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl QueryTextGenerator {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            ctx: BuildContext::new(dialect),
            main_from: None,
            from_items: Vec::new(),
            predicates: Vec::new(),
            orderings: Vec::new(),
            selector: None,
            distinct: false,
            limit: None,
            offset: None,
        }
    }

    /// Visit `model` and render it. No text is produced if any clause is unsupported.
    pub fn generate(mut self, model: &QueryModel) -> Result<CompiledQuery> {
        for (id, name) in model.query_sources() {
            self.ctx.declare_source(id, name);
        }
        model.accept(&mut self)?;
        self.finish()
    }

    fn dialect(&self) -> Dialect {
        self.ctx.dialect()
    }

    fn finish(mut self) -> Result<CompiledQuery> {
        let dialect = self.dialect();
        let Some((item_type, item_name)) = self.main_from.take() else {
            return Err(Error::unsupported(
                "query model",
                "no main from clause was visited",
            ));
        };
        let Some(selector) = self.selector.take() else {
            return Err(Error::unsupported("query model", "no select clause was visited"));
        };

        let mut sql = dialect.keyword("select");
        if self.distinct {
            sql.push(' ');
            sql.push_str(&dialect.keyword("distinct"));
        }
        sql.push(' ');
        sql.push_str(&selector.build(&mut self.ctx)?);

        sql.push_str(&format!(
            " {} {} {}",
            dialect.keyword("from"),
            dialect.quote_identifier(&item_type),
            dialect.quote_identifier(&item_name)
        ));

        for item in std::mem::take(&mut self.from_items) {
            match item {
                FromItem::Join {
                    inner,
                    name,
                    source,
                    restrictions,
                } => {
                    let keyword = if inner {
                        dialect.inner_join_keyword()
                    } else {
                        dialect.outer_join_keyword()
                    };
                    let source_sql = source.build(&mut self.ctx)?;
                    sql.push_str(&format!(
                        " {keyword} {source_sql} {}",
                        dialect.quote_identifier(&name)
                    ));
                    if !restrictions.is_empty() {
                        sql.push(' ');
                        sql.push_str(dialect.join_condition_keyword());
                        sql.push(' ');
                        sql.push_str(&self.conjunction(&restrictions)?);
                    }
                }
                FromItem::Cross {
                    item_type,
                    name,
                    source,
                } => {
                    let source_sql = source.build(&mut self.ctx)?;
                    if dialect == Dialect::Hql {
                        sql.push_str(&format!(", {item_type} {name} in {source_sql}"));
                    } else {
                        sql.push_str(&format!(
                            " CROSS JOIN {source_sql} {}",
                            dialect.quote_identifier(&name)
                        ));
                    }
                }
            }
        }

        let predicates = std::mem::take(&mut self.predicates);
        if !predicates.is_empty() {
            sql.push(' ');
            sql.push_str(&dialect.keyword("where"));
            sql.push(' ');
            sql.push_str(&self.conjunction(&predicates)?);
        }

        let orderings = std::mem::take(&mut self.orderings);
        if !orderings.is_empty() {
            let mut parts = Vec::with_capacity(orderings.len());
            for ordering in &orderings {
                let mut part = ordering.expr.build(&mut self.ctx)?;
                if ordering.direction == OrderDirection::Desc {
                    part.push(' ');
                    part.push_str(&dialect.keyword("desc"));
                }
                parts.push(part);
            }
            sql.push_str(&format!(
                " {} {}",
                dialect.keyword("order by"),
                parts.join(", ")
            ));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" {} {limit}", dialect.keyword("limit")));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" {} {offset}", dialect.keyword("offset")));
        }

        trace!(sql = %sql, params = self.ctx.params().len(), "Generated query text");
        Ok(CompiledQuery {
            text: sql,
            params: self.ctx.into_params(),
        })
    }

    /// Join predicates with `and`, parenthesizing disjunctions.
    fn conjunction(&mut self, predicates: &[Expr]) -> Result<String> {
        let mut parts = Vec::with_capacity(predicates.len());
        for predicate in predicates {
            let part = predicate.build(&mut self.ctx)?;
            let needs_parens = predicates.len() > 1
                && matches!(predicate, Expr::Binary { op: BinaryOp::Or, .. });
            if needs_parens {
                parts.push(format!("({part})"));
            } else {
                parts.push(part);
            }
        }
        let separator = format!(" {} ", self.dialect().keyword("and"));
        Ok(parts.join(&separator))
    }
}

impl QueryModelVisitor for QueryTextGenerator {
    fn visit_main_from_clause(&mut self, clause: &FromClause, _model: &QueryModel) -> Result<()> {
        self.main_from = Some((
            clause.item_type().name().to_string(),
            clause.item_name().to_string(),
        ));
        Ok(())
    }

    fn visit_additional_from_clause(
        &mut self,
        clause: &FromClause,
        _model: &QueryModel,
        _index: usize,
    ) -> Result<()> {
        self.from_items.push(FromItem::Cross {
            item_type: clause.item_type().name().to_string(),
            name: clause.item_name().to_string(),
            source: clause.source().clone(),
        });
        Ok(())
    }

    fn visit_join_clause(
        &mut self,
        clause: &JoinClause,
        _model: &QueryModel,
        _index: usize,
    ) -> Result<()> {
        self.from_items.push(FromItem::Join {
            inner: clause.is_inner(),
            name: clause.item_name().to_string(),
            source: clause.source().clone(),
            restrictions: clause
                .restrictions()
                .iter()
                .map(|r| r.predicate().clone())
                .collect(),
        });
        Ok(())
    }

    fn visit_group_join_clause(
        &mut self,
        clause: &GroupJoinClause,
        _model: &QueryModel,
        index: usize,
    ) -> Result<()> {
        Err(Error::unsupported(
            format!("group join at body index {index}"),
            format!("'{clause}' must be flattened into a join before translation"),
        ))
    }

    fn visit_where_clause(
        &mut self,
        clause: &WhereClause,
        _model: &QueryModel,
        _index: usize,
    ) -> Result<()> {
        self.predicates.push(clause.predicate().clone());
        Ok(())
    }

    fn visit_order_by_clause(
        &mut self,
        clause: &OrderByClause,
        _model: &QueryModel,
        _index: usize,
    ) -> Result<()> {
        self.orderings.extend(clause.orderings().iter().cloned());
        Ok(())
    }

    fn visit_select_clause(&mut self, clause: &SelectClause, _model: &QueryModel) -> Result<()> {
        self.selector = Some(clause.selector().clone());
        Ok(())
    }

    fn visit_result_operator(
        &mut self,
        op: &ResultOperator,
        _model: &QueryModel,
        _index: usize,
    ) -> Result<()> {
        match op {
            // Skip(m).Take(n) is LIMIT n OFFSET m; repeated takes keep the smallest
            ResultOperator::Take(n) => self.limit = Some(self.limit.map_or(*n, |l| l.min(*n))),
            ResultOperator::Skip(n) => {
                if self.limit.is_some() {
                    return Err(Error::unsupported(
                        op.to_string(),
                        "skip after take cannot be expressed with limit/offset",
                    ));
                }
                self.offset = Some(self.offset.unwrap_or(0) + n);
            }
            ResultOperator::Distinct => self.distinct = true,
            ResultOperator::Other(name) => {
                return Err(Error::unsupported(
                    format!("{name}()"),
                    "result operator has no query text translation",
                ));
            }
        }
        Ok(())
    }
}

/// Optimize joins in `model`, then serialize it for `dialect`.
pub fn compile(model: &mut QueryModel, dialect: Dialect) -> Result<CompiledQuery> {
    WhereJoinDetector::new().optimize(model);
    QueryTextGenerator::new(dialect).generate(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::{GroupJoinClause, WithClause};
    use crate::source::{ItemType, QuerySourceId};

    struct Orders {
        model: QueryModel,
        customer: QuerySourceId,
        order: QuerySourceId,
    }

    fn customers_with_orders() -> Orders {
        let c = FromClause::entities("c", ItemType::new("Customer").unwrap()).unwrap();
        let customer = c.id();
        let join = JoinClause::new("o", ItemType::new("Order").unwrap(), c.member("orders")).unwrap();
        let order = join.id();
        let mut model = QueryModel::select_items(c);
        model.add_body_clause(join);
        Orders {
            model,
            customer,
            order,
        }
    }

    #[test]
    fn test_plain_outer_join() {
        let q = customers_with_orders();
        let compiled = QueryTextGenerator::new(Dialect::Hql)
            .generate(&q.model)
            .unwrap();
        assert_eq!(compiled.text, "select c from Customer c left join c.orders o");
        assert!(compiled.params.is_empty());
    }

    #[test]
    fn test_compile_promotes_and_binds_in_order() {
        let mut q = customers_with_orders();
        if let crate::clause::BodyClause::Join(join) = &mut q.model.body_clauses_mut()[0] {
            join.add_restriction(WithClause::new(join.member("status").eq("open")).unwrap());
        }
        q.model.add_body_clause(
            WhereClause::new(Expr::member(q.order, "total").gt(100)).unwrap(),
        );

        let compiled = compile(&mut q.model, Dialect::Hql).unwrap();
        assert_eq!(
            compiled.text,
            "select c from Customer c inner join c.orders o with o.status = :p1 where o.total > :p2"
        );
        assert_eq!(
            compiled.params,
            vec![Value::Text("open".into()), Value::Int(100)]
        );
    }

    #[test]
    fn test_sql_dialect_keywords() {
        let mut q = customers_with_orders();
        q.model.add_body_clause(
            WhereClause::new(Expr::member(q.order, "id").is_null()).unwrap(),
        );
        let compiled = compile(&mut q.model, Dialect::Postgres).unwrap();
        assert_eq!(
            compiled.text,
            "SELECT \"c\" FROM \"Customer\" \"c\" LEFT OUTER JOIN \"c\".\"orders\" \"o\" WHERE \"o\".\"id\" IS NULL"
        );
    }

    #[test]
    fn test_multiple_where_clauses_and_disjunction() {
        let mut q = customers_with_orders();
        q.model.add_body_clause(
            WhereClause::new(
                Expr::member(q.customer, "vip")
                    .eq(true)
                    .or(Expr::member(q.customer, "age").gt(60)),
            )
            .unwrap(),
        );
        q.model.add_body_clause(
            WhereClause::new(Expr::member(q.customer, "name").like("A%")).unwrap(),
        );
        q.model.add_body_clause(
            OrderByClause::new(vec![
                Expr::member(q.customer, "name").asc(),
                Expr::member(q.customer, "age").desc(),
            ])
            .unwrap(),
        );
        q.model.add_result_operator(ResultOperator::Skip(20));
        q.model.add_result_operator(ResultOperator::Take(10));

        let compiled = compile(&mut q.model, Dialect::Hql).unwrap();
        assert_eq!(
            compiled.text,
            "select c from Customer c left join c.orders o \
             where (c.vip = :p1 or c.age > :p2) and c.name like :p3 \
             order by c.name, c.age desc limit 10 offset 20"
        );
        assert_eq!(compiled.params.len(), 3);
    }

    #[test]
    fn test_additional_from_clause() {
        let mut q = customers_with_orders();
        let products = FromClause::entities("p", ItemType::new("Product").unwrap()).unwrap();
        let product = products.id();
        q.model.add_body_clause(products);
        q.model.add_body_clause(
            WhereClause::new(Expr::member(product, "id").eq(Expr::member(q.order, "productId")))
                .unwrap(),
        );

        let compiled = compile(&mut q.model, Dialect::Hql).unwrap();
        assert_eq!(
            compiled.text,
            "select c from Customer c inner join c.orders o, Product p in Product where p.id = o.productId"
        );
    }

    #[test]
    fn test_distinct() {
        let mut q = customers_with_orders();
        q.model.add_result_operator(ResultOperator::Distinct);
        let compiled = compile(&mut q.model, Dialect::Hql).unwrap();
        assert!(compiled.text.starts_with("select distinct c from"));
    }

    #[test]
    fn test_group_join_is_unsupported() {
        let mut q = customers_with_orders();
        let inner = JoinClause::new("i", ItemType::new("Invoice").unwrap(), Expr::raw("Invoice")).unwrap();
        let group = GroupJoinClause::new("g", ItemType::new("Invoice").unwrap(), inner).unwrap();
        q.model.add_body_clause(group);

        let err = compile(&mut q.model, Dialect::Hql).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_undeclared_source_is_unsupported() {
        let mut q = customers_with_orders();
        let stranger = QuerySourceId::fresh();
        q.model.add_body_clause(
            WhereClause::new(Expr::member(stranger, "x").eq(1)).unwrap(),
        );
        let err = compile(&mut q.model, Dialect::Hql).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_unsupported_result_operators() {
        let mut q = customers_with_orders();
        q.model
            .add_result_operator(ResultOperator::Other("Aggregate".into()));
        assert!(compile(&mut q.model, Dialect::Hql).unwrap_err().is_unsupported());

        let mut q = customers_with_orders();
        q.model.add_result_operator(ResultOperator::Take(5));
        q.model.add_result_operator(ResultOperator::Skip(5));
        assert!(compile(&mut q.model, Dialect::Hql).unwrap_err().is_unsupported());
    }

    #[derive(Default)]
    struct ClauseCounter {
        visited: Vec<String>,
    }

    impl QueryModelVisitor for ClauseCounter {
        fn visit_main_from_clause(&mut self, clause: &FromClause, _: &QueryModel) -> Result<()> {
            self.visited.push(format!("from {}", clause.item_name()));
            Ok(())
        }

        fn visit_join_clause(&mut self, clause: &JoinClause, _: &QueryModel, index: usize) -> Result<()> {
            self.visited.push(format!("join {} @{index}", clause.item_name()));
            Ok(())
        }

        fn visit_where_clause(&mut self, _: &WhereClause, _: &QueryModel, index: usize) -> Result<()> {
            self.visited.push(format!("where @{index}"));
            Ok(())
        }
    }

    #[test]
    fn test_visit_in_declaration_order() {
        let mut q = customers_with_orders();
        q.model.add_body_clause(
            WhereClause::new(Expr::member(q.order, "total").gt(1)).unwrap(),
        );
        let mut counter = ClauseCounter::default();
        q.model.accept(&mut counter).unwrap();
        assert_eq!(counter.visited, vec!["from c", "join o @0", "where @1"]);
    }
}
