//! Target query language dialects.

/// Dialect of the emitted query text.
///
/// The dialect decides parameter placeholders, identifier quoting and the
/// keywords used for inner and outer joins. It is configuration of the target
/// system, never of the query model itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Object query language over entity names and member paths
    /// (`left join c.orders o with ...`), `:p1` placeholders
    #[default]
    Hql,
    /// PostgreSQL (`$1` placeholders)
    Postgres,
    /// SQLite (`?1` placeholders)
    Sqlite,
    /// MySQL (`?` placeholders)
    Mysql,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Hql => format!(":p{index}"),
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Keyword introducing an inner join.
    pub const fn inner_join_keyword(self) -> &'static str {
        match self {
            Dialect::Hql => "inner join",
            Dialect::Postgres | Dialect::Sqlite | Dialect::Mysql => "INNER JOIN",
        }
    }

    /// Keyword introducing a (left) outer join.
    pub const fn outer_join_keyword(self) -> &'static str {
        match self {
            Dialect::Hql => "left join",
            Dialect::Postgres | Dialect::Sqlite | Dialect::Mysql => "LEFT OUTER JOIN",
        }
    }

    /// Keyword attaching restrictions to a join.
    pub const fn join_condition_keyword(self) -> &'static str {
        match self {
            Dialect::Hql => "with",
            Dialect::Postgres | Dialect::Sqlite | Dialect::Mysql => "ON",
        }
    }

    /// Whether clause keywords are written in upper case.
    pub const fn uppercase_keywords(self) -> bool {
        !matches!(self, Dialect::Hql)
    }

    /// Render a clause keyword (`select`, `where`, `order by`, ...) in this dialect's case.
    pub fn keyword(self, word: &str) -> String {
        if self.uppercase_keywords() {
            word.to_ascii_uppercase()
        } else {
            word.to_string()
        }
    }

    /// Check if this dialect supports ILIKE.
    pub const fn supports_ilike(self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    /// Quote an identifier for this dialect.
    ///
    /// HQL identifiers are member names and are emitted verbatim.
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Hql => name.to_string(),
            Dialect::Postgres | Dialect::Sqlite => {
                let escaped = name.replace('"', "\"\"");
                format!("\"{}\"", escaped)
            }
            Dialect::Mysql => {
                let escaped = name.replace('`', "``");
                format!("`{}`", escaped)
            }
        }
    }
}
