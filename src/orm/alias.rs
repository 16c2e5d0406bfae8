//! Filter alias grammar
//!
//! An alias packs a whole filter instruction into one key string:
//!
//! ```text
//! alias   := (op "@" | method "::")? (relation "^")* (clause "~")* field ("." field)*
//! ident   := [A-Za-z0-9_]+
//! ```
//!
//! Examples:
//! - `name` : equality on a local column
//! - `ilike::name.name_ru` : case-insensitive match on either column
//! - `ilike::CityModel^CountryModel^region` : match through two relations
//! - `eq@FlightModel^mar1_iata~mar2_iata~company_iata` : join flights where
//!   either route leg points at the base row, then compare `company_iata`

use std::fmt;

use thiserror::Error;

/// Grammar failure. Aliases are declared in code, so this is a
/// configuration defect rather than a user error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AliasError {
    #[error("alias is empty")]
    Empty,
    #[error("alias '{alias}': unexpected '{found}' at offset {offset}")]
    Unexpected {
        alias: String,
        offset: usize,
        found: char,
    },
    #[error("alias '{alias}': expected a name at offset {offset}")]
    ExpectedName { alias: String, offset: usize },
    #[error("alias '{alias}': unknown operator '{name}'")]
    UnknownOperator { alias: String, name: String },
    #[error("alias '{alias}': unknown method '{name}'")]
    UnknownMethod { alias: String, name: String },
    #[error("alias '{alias}': relation '{name}' follows a clause")]
    RelationAfterClause { alias: String, name: String },
}

/// Binary comparison operators (`op@`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Operator {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "eq" => Self::Eq,
            "ne" => Self::Ne,
            "lt" => Self::Lt,
            "le" => Self::Le,
            "gt" => Self::Gt,
            "ge" => Self::Ge,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
        }
    }

    /// SQL comparison symbol
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Named predicate-producing operations (`method::`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    In,
    NotIn,
    Like,
    NotLike,
    ILike,
    NotILike,
    StartsWith,
    EndsWith,
    Contains,
}

impl Method {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "in_" => Self::In,
            "not_in" => Self::NotIn,
            "like" => Self::Like,
            "not_like" => Self::NotLike,
            "ilike" => Self::ILike,
            "not_ilike" => Self::NotILike,
            "startswith" => Self::StartsWith,
            "endswith" => Self::EndsWith,
            "contains" => Self::Contains,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::In => "in_",
            Self::NotIn => "not_in",
            Self::Like => "like",
            Self::NotLike => "not_like",
            Self::ILike => "ilike",
            Self::NotILike => "not_ilike",
            Self::StartsWith => "startswith",
            Self::EndsWith => "endswith",
            Self::Contains => "contains",
        }
    }
}

/// How the alias compares its fields with the supplied value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Comparison {
    /// No prefix: plain equality
    #[default]
    Equal,
    Operator(Operator),
    Method(Method),
}

/// Decoded form of one alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAlias {
    pub comparison: Comparison,
    /// Model names to traverse from the base entity, in order
    pub relations: Vec<String>,
    /// Columns of the last relation compared against the base primary key
    /// to build a manual join condition
    pub clauses: Vec<String>,
    /// Columns tested; more than one are OR'ed together
    pub fields: Vec<String>,
}

impl fmt::Display for ParsedAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.comparison {
            Comparison::Equal => {}
            Comparison::Operator(op) => write!(f, "{}@", op.name())?,
            Comparison::Method(method) => write!(f, "{}::", method.name())?,
        }
        for relation in &self.relations {
            write!(f, "{relation}^")?;
        }
        for clause in &self.clauses {
            write!(f, "{clause}~")?;
        }
        f.write_str(&self.fields.join("."))
    }
}

/// Parse an alias string.
pub fn parse(alias: &str) -> Result<ParsedAlias, AliasError> {
    Parser::new(alias).parse()
}

/// Check an alias against the grammar without keeping the result.
pub fn validate(alias: &str) -> Result<(), AliasError> {
    parse(alias).map(|_| ())
}

/// Single-pass scanner over the alias bytes.
struct Parser<'a> {
    alias: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(alias: &'a str) -> Self {
        Self { alias, pos: 0 }
    }

    fn parse(mut self) -> Result<ParsedAlias, AliasError> {
        if self.alias.is_empty() {
            return Err(AliasError::Empty);
        }

        let mut parsed = ParsedAlias {
            comparison: Comparison::Equal,
            relations: Vec::new(),
            clauses: Vec::new(),
            fields: Vec::new(),
        };

        let mut first = true;
        loop {
            let name = self.name()?;
            match self.peek() {
                Some('@') if first => {
                    self.pos += 1;
                    parsed.comparison = Comparison::Operator(Operator::from_name(name).ok_or_else(
                        || AliasError::UnknownOperator {
                            alias: self.alias.to_string(),
                            name: name.to_string(),
                        },
                    )?);
                }
                Some(':') if first && self.alias[self.pos..].starts_with("::") => {
                    self.pos += 2;
                    parsed.comparison = Comparison::Method(Method::from_name(name).ok_or_else(
                        || AliasError::UnknownMethod {
                            alias: self.alias.to_string(),
                            name: name.to_string(),
                        },
                    )?);
                }
                Some('^') => {
                    if !parsed.clauses.is_empty() {
                        return Err(AliasError::RelationAfterClause {
                            alias: self.alias.to_string(),
                            name: name.to_string(),
                        });
                    }
                    self.pos += 1;
                    parsed.relations.push(name.to_string());
                }
                Some('~') => {
                    self.pos += 1;
                    parsed.clauses.push(name.to_string());
                }
                Some('.') | None => {
                    parsed.fields.push(name.to_string());
                    return self.fields(parsed);
                }
                Some(found) => return Err(self.unexpected(found)),
            }
            first = false;
        }
    }

    /// Remainder after the first field: `("." field)*`
    fn fields(mut self, mut parsed: ParsedAlias) -> Result<ParsedAlias, AliasError> {
        loop {
            match self.peek() {
                None => return Ok(parsed),
                Some('.') => {
                    self.pos += 1;
                    let name = self.name()?;
                    parsed.fields.push(name.to_string());
                }
                Some(found) => return Err(self.unexpected(found)),
            }
        }
    }

    fn name(&mut self) -> Result<&'a str, AliasError> {
        let start = self.pos;
        let rest = &self.alias[start..];
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(AliasError::ExpectedName {
                alias: self.alias.to_string(),
                offset: start,
            });
        }
        self.pos += len;
        Ok(&self.alias[start..start + len])
    }

    fn peek(&self) -> Option<char> {
        self.alias[self.pos..].chars().next()
    }

    fn unexpected(&self, found: char) -> AliasError {
        AliasError::Unexpected {
            alias: self.alias.to_string(),
            offset: self.pos,
            found,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plain_field() {
        let parsed = parse("gate_id").unwrap();
        assert_eq!(parsed.comparison, Comparison::Equal);
        assert!(parsed.relations.is_empty());
        assert!(parsed.clauses.is_empty());
        assert_eq!(parsed.fields, strings(&["gate_id"]));
    }

    #[test]
    fn test_operator_prefix() {
        let parsed = parse("ge@sked_local").unwrap();
        assert_eq!(parsed.comparison, Comparison::Operator(Operator::Ge));
        assert_eq!(parsed.fields, strings(&["sked_local"]));
    }

    #[test]
    fn test_method_with_several_fields() {
        let parsed = parse("ilike::name.name_ru").unwrap();
        assert_eq!(parsed.comparison, Comparison::Method(Method::ILike));
        assert_eq!(parsed.fields, strings(&["name", "name_ru"]));
    }

    #[test]
    fn test_relation_chain() {
        let parsed = parse("ilike::CityModel^CountryModel^region").unwrap();
        assert_eq!(parsed.relations, strings(&["CityModel", "CountryModel"]));
        assert_eq!(parsed.fields, strings(&["region"]));
    }

    #[test]
    fn test_clauses() {
        let parsed = parse("eq@FlightModel^mar1_iata~mar2_iata~company_iata").unwrap();
        assert_eq!(parsed.comparison, Comparison::Operator(Operator::Eq));
        assert_eq!(parsed.relations, strings(&["FlightModel"]));
        assert_eq!(parsed.clauses, strings(&["mar1_iata", "mar2_iata"]));
        assert_eq!(parsed.fields, strings(&["company_iata"]));
    }

    #[test]
    fn test_in_method_name_with_underscore() {
        let parsed = parse("in_::CompanyModel^iata").unwrap();
        assert_eq!(parsed.comparison, Comparison::Method(Method::In));
        assert_eq!(parsed.relations, strings(&["CompanyModel"]));
    }

    #[test]
    fn test_display_roundtrips_source() {
        for alias in [
            "name",
            "ilike::name.name_ru",
            "le@FlightModel^mar1_iata~mar2_iata~sked_local",
            "in_::mar1_iata.mar2_iata",
        ] {
            assert_eq!(parse(alias).unwrap().to_string(), alias);
        }
    }

    #[test]
    fn test_parse_is_deterministic() {
        let alias = "eq@FlightModel^mar1_iata~mar2_iata~direction";
        assert_eq!(parse(alias).unwrap(), parse(alias).unwrap());
    }

    #[test]
    fn test_rejects_malformed_aliases() {
        assert_matches!(parse(""), Err(AliasError::Empty));
        assert_matches!(parse("name."), Err(AliasError::ExpectedName { .. }));
        assert_matches!(parse(".name"), Err(AliasError::ExpectedName { .. }));
        assert_matches!(parse("CityModel^"), Err(AliasError::ExpectedName { .. }));
        assert_matches!(parse("name-ru"), Err(AliasError::Unexpected { found: '-', .. }));
        assert_matches!(parse("eq@ilike::name"), Err(AliasError::Unexpected { found: ':', .. }));
        assert_matches!(parse("eq@"), Err(AliasError::ExpectedName { .. }));
        assert_matches!(parse("ilike:name"), Err(AliasError::Unexpected { found: ':', .. }));
    }

    #[test]
    fn test_rejects_unknown_prefixes() {
        assert_matches!(parse("approx@name"), Err(AliasError::UnknownOperator { .. }));
        assert_matches!(parse("soundex::name"), Err(AliasError::UnknownMethod { .. }));
    }

    #[test]
    fn test_relation_cannot_follow_clause() {
        assert_matches!(
            parse("FlightModel^mar1_iata~AirportModel^name"),
            Err(AliasError::RelationAfterClause { .. })
        );
    }

    #[test]
    fn test_field_segment_cannot_contain_relation() {
        assert_matches!(parse("name.CityModel^name"), Err(AliasError::Unexpected { found: '^', .. }));
    }
}
