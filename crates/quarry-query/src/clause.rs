//! Clauses of a query model (FROM, WHERE, ORDER BY, result operators).

use crate::expr::Expr;
use crate::join::JoinClause;
use crate::model::QueryModel;
use crate::source::{CloneContext, ItemType, QuerySourceId};
use crate::visitor::QueryModelVisitor;
use quarry_core::{Error, Result};
use std::fmt;

pub(crate) fn validate_item_name(item_name: &str) -> Result<()> {
    if item_name.trim().is_empty() {
        return Err(Error::invalid_argument(
            "item_name",
            "item name cannot be empty",
        ));
    }
    Ok(())
}

pub(crate) fn validate_expression(argument: &'static str, expr: &Expr) -> Result<()> {
    if expr.is_blank() {
        return Err(Error::invalid_argument(
            argument,
            "expression cannot be an empty fragment",
        ));
    }
    Ok(())
}

/// A `from <Type> <name> in <source>` clause.
///
/// Used both for the main from clause of a model and for additional from clauses in
/// the body (which are emitted as cross joins).
#[derive(Debug, PartialEq)]
pub struct FromClause {
    id: QuerySourceId,
    item_name: String,
    item_type: ItemType,
    source: Expr,
}

impl FromClause {
    /// Create a from clause with a fresh source identity.
    pub fn new(item_name: impl Into<String>, item_type: ItemType, source: Expr) -> Result<Self> {
        let item_name = item_name.into();
        validate_item_name(&item_name)?;
        validate_expression("from_expression", &source)?;
        Ok(Self {
            id: QuerySourceId::fresh(),
            item_name,
            item_type,
            source,
        })
    }

    /// From clause over every entity of `item_type`.
    pub fn entities(item_name: impl Into<String>, item_type: ItemType) -> Result<Self> {
        let source = Expr::raw(item_type.name());
        Self::new(item_name, item_type, source)
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

    /// Reference to a member of this clause's items.
    pub fn member(&self, name: impl Into<String>) -> Expr {
        Expr::member(self.id, name)
    }

    /// Reference to this clause's items.
    pub fn items(&self) -> Expr {
        Expr::source(self.id)
    }

    pub fn transform_expressions<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&Expr) -> Result<Expr>,
    {
        let source = f(&self.source)?;
        validate_expression("from_expression", &source)?;
        self.source = source;
        Ok(())
    }

    /// Clone with a fresh identity, registering the mapping in `ctx`.
    pub fn clone_with(&self, ctx: &mut CloneContext) -> Self {
        let id = QuerySourceId::fresh();
        ctx.add_mapping(self.id, id);
        let mut source = self.source.clone();
        source.remap_sources(ctx);
        Self {
            id,
            item_name: self.item_name.clone(),
            item_type: self.item_type.clone(),
            source,
        }
    }
}

impl fmt::Display for FromClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "from {} {} in {}",
            self.item_type, self.item_name, self.source
        )
    }
}

/// A restriction attached to a join (`with <predicate>`).
#[derive(Debug, Clone, PartialEq)]
pub struct WithClause {
    predicate: Expr,
}

impl WithClause {
    pub fn new(predicate: Expr) -> Result<Self> {
        validate_expression("predicate", &predicate)?;
        Ok(Self { predicate })
    }

    pub fn predicate(&self) -> &Expr {
        &self.predicate
    }

    pub(crate) fn set_predicate(&mut self, predicate: Expr) {
        self.predicate = predicate;
    }

    pub fn clone_with(&self, ctx: &CloneContext) -> Self {
        let mut predicate = self.predicate.clone();
        predicate.remap_sources(ctx);
        Self { predicate }
    }
}

impl fmt::Display for WithClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "with {}", self.predicate)
    }
}

/// A `where <predicate>` body clause.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    predicate: Expr,
}

impl WhereClause {
    pub fn new(predicate: Expr) -> Result<Self> {
        validate_expression("predicate", &predicate)?;
        Ok(Self { predicate })
    }

    pub fn predicate(&self) -> &Expr {
        &self.predicate
    }

    pub fn transform_expressions<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&Expr) -> Result<Expr>,
    {
        let predicate = f(&self.predicate)?;
        validate_expression("predicate", &predicate)?;
        self.predicate = predicate;
        Ok(())
    }

    pub fn clone_with(&self, ctx: &CloneContext) -> Self {
        let mut predicate = self.predicate.clone();
        predicate.remap_sources(ctx);
        Self { predicate }
    }
}

impl fmt::Display for WhereClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "where {}", self.predicate)
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

/// One ordering of an order-by clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Ordering {
    pub expr: Expr,
    pub direction: OrderDirection,
}

impl Ordering {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            direction: OrderDirection::Asc,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            direction: OrderDirection::Desc,
        }
    }
}

impl fmt::Display for Ordering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            OrderDirection::Asc => write!(f, "{} asc", self.expr),
            OrderDirection::Desc => write!(f, "{} desc", self.expr),
        }
    }
}

/// An `order by` body clause.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByClause {
    orderings: Vec<Ordering>,
}

impl OrderByClause {
    pub fn new(orderings: Vec<Ordering>) -> Result<Self> {
        if orderings.is_empty() {
            return Err(Error::invalid_argument(
                "orderings",
                "order by needs at least one ordering",
            ));
        }
        for ordering in &orderings {
            validate_expression("orderings", &ordering.expr)?;
        }
        Ok(Self { orderings })
    }

    pub fn orderings(&self) -> &[Ordering] {
        &self.orderings
    }

    pub fn transform_expressions<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&Expr) -> Result<Expr>,
    {
        let mut transformed = Vec::with_capacity(self.orderings.len());
        for ordering in &self.orderings {
            let expr = f(&ordering.expr)?;
            validate_expression("orderings", &expr)?;
            transformed.push(expr);
        }
        for (ordering, expr) in self.orderings.iter_mut().zip(transformed) {
            ordering.expr = expr;
        }
        Ok(())
    }

    pub fn clone_with(&self, ctx: &CloneContext) -> Self {
        let orderings = self
            .orderings
            .iter()
            .map(|o| {
                let mut expr = o.expr.clone();
                expr.remap_sources(ctx);
                Ordering {
                    expr,
                    direction: o.direction,
                }
            })
            .collect();
        Self { orderings }
    }
}

impl fmt::Display for OrderByClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("orderby ")?;
        for (i, ordering) in self.orderings.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{ordering}")?;
        }
        Ok(())
    }
}

/// A join whose items are grouped into a collection (`join ... into g`).
///
/// Group joins that were not flattened into a plain join cannot be serialized.
#[derive(Debug, PartialEq)]
pub struct GroupJoinClause {
    id: QuerySourceId,
    item_name: String,
    item_type: ItemType,
    join: JoinClause,
}

impl GroupJoinClause {
    pub fn new(item_name: impl Into<String>, item_type: ItemType, join: JoinClause) -> Result<Self> {
        let item_name = item_name.into();
        validate_item_name(&item_name)?;
        Ok(Self {
            id: QuerySourceId::fresh(),
            item_name,
            item_type,
            join,
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

    pub fn join(&self) -> &JoinClause {
        &self.join
    }

    pub fn transform_expressions<F>(&mut self, f: F) -> Result<()>
    where
        F: FnMut(&Expr) -> Result<Expr>,
    {
        self.join.transform_expressions(f)
    }

    pub fn clone_with(&self, ctx: &mut CloneContext) -> Self {
        let id = QuerySourceId::fresh();
        ctx.add_mapping(self.id, id);
        Self {
            id,
            item_name: self.item_name.clone(),
            item_type: self.item_type.clone(),
            join: self.join.clone_with(ctx),
        }
    }
}

impl fmt::Display for GroupJoinClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} into {} {}", self.join, self.item_type, self.item_name)
    }
}

/// A clause in the body of a query model, between the main from clause and the
/// select clause.
#[derive(Debug, PartialEq)]
pub enum BodyClause {
    AdditionalFrom(FromClause),
    Join(JoinClause),
    GroupJoin(GroupJoinClause),
    Where(WhereClause),
    OrderBy(OrderByClause),
}

impl BodyClause {
    /// Dispatch to the visitor method for this clause kind.
    pub fn accept<V>(&self, visitor: &mut V, model: &QueryModel, index: usize) -> Result<()>
    where
        V: QueryModelVisitor + ?Sized,
    {
        match self {
            BodyClause::AdditionalFrom(c) => visitor.visit_additional_from_clause(c, model, index),
            BodyClause::Join(c) => c.accept(visitor, model, index),
            BodyClause::GroupJoin(c) => visitor.visit_group_join_clause(c, model, index),
            BodyClause::Where(c) => visitor.visit_where_clause(c, model, index),
            BodyClause::OrderBy(c) => visitor.visit_order_by_clause(c, model, index),
        }
    }

    /// Identity and item name of the query source this clause introduces, if any.
    pub fn query_source(&self) -> Option<(QuerySourceId, &str)> {
        match self {
            BodyClause::AdditionalFrom(c) => Some((c.id(), c.item_name())),
            BodyClause::Join(c) => Some((c.id(), c.item_name())),
            BodyClause::GroupJoin(c) => Some((c.id(), c.item_name())),
            BodyClause::Where(_) | BodyClause::OrderBy(_) => None,
        }
    }

    pub fn transform_expressions<F>(&mut self, f: F) -> Result<()>
    where
        F: FnMut(&Expr) -> Result<Expr>,
    {
        match self {
            BodyClause::AdditionalFrom(c) => c.transform_expressions(f),
            BodyClause::Join(c) => c.transform_expressions(f),
            BodyClause::GroupJoin(c) => c.transform_expressions(f),
            BodyClause::Where(c) => c.transform_expressions(f),
            BodyClause::OrderBy(c) => c.transform_expressions(f),
        }
    }

    pub fn clone_with(&self, ctx: &mut CloneContext) -> Self {
        match self {
            BodyClause::AdditionalFrom(c) => BodyClause::AdditionalFrom(c.clone_with(ctx)),
            BodyClause::Join(c) => BodyClause::Join(c.clone_with(ctx)),
            BodyClause::GroupJoin(c) => BodyClause::GroupJoin(c.clone_with(ctx)),
            BodyClause::Where(c) => BodyClause::Where(c.clone_with(ctx)),
            BodyClause::OrderBy(c) => BodyClause::OrderBy(c.clone_with(ctx)),
        }
    }
}

impl fmt::Display for BodyClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyClause::AdditionalFrom(c) => c.fmt(f),
            BodyClause::Join(c) => c.fmt(f),
            BodyClause::GroupJoin(c) => c.fmt(f),
            BodyClause::Where(c) => c.fmt(f),
            BodyClause::OrderBy(c) => c.fmt(f),
        }
    }
}

impl From<FromClause> for BodyClause {
    fn from(c: FromClause) -> Self {
        BodyClause::AdditionalFrom(c)
    }
}

impl From<JoinClause> for BodyClause {
    fn from(c: JoinClause) -> Self {
        BodyClause::Join(c)
    }
}

impl From<GroupJoinClause> for BodyClause {
    fn from(c: GroupJoinClause) -> Self {
        BodyClause::GroupJoin(c)
    }
}

impl From<WhereClause> for BodyClause {
    fn from(c: WhereClause) -> Self {
        BodyClause::Where(c)
    }
}

impl From<OrderByClause> for BodyClause {
    fn from(c: OrderByClause) -> Self {
        BodyClause::OrderBy(c)
    }
}

/// The `select <selector>` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectClause {
    selector: Expr,
}

impl SelectClause {
    pub fn new(selector: Expr) -> Result<Self> {
        validate_expression("selector", &selector)?;
        Ok(Self { selector })
    }

    /// Select the items of a query source.
    pub fn for_source(source: QuerySourceId) -> Self {
        Self {
            selector: Expr::source(source),
        }
    }

    pub fn selector(&self) -> &Expr {
        &self.selector
    }

    pub fn transform_expressions<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&Expr) -> Result<Expr>,
    {
        let selector = f(&self.selector)?;
        validate_expression("selector", &selector)?;
        self.selector = selector;
        Ok(())
    }

    pub fn clone_with(&self, ctx: &CloneContext) -> Self {
        let mut selector = self.selector.clone();
        selector.remap_sources(ctx);
        Self { selector }
    }
}

impl fmt::Display for SelectClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "select {}", self.selector)
    }
}

/// Operators applied to the query result after the select clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultOperator {
    /// Keep at most n rows (LIMIT)
    Take(u64),
    /// Skip the first n rows (OFFSET)
    Skip(u64),
    /// Remove duplicate rows
    Distinct,
    /// Any other operator, named for diagnostics; never translatable
    Other(String),
}

impl fmt::Display for ResultOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultOperator::Take(n) => write!(f, "Take({n})"),
            ResultOperator::Skip(n) => write!(f, "Skip({n})"),
            ResultOperator::Distinct => f.write_str("Distinct()"),
            ResultOperator::Other(name) => write!(f, "{name}()"),
        }
    }
}
