//! Status enums shared with the main application's account tables.

use serde::{Deserialize, Serialize};

/// Kind of an account book.
///
/// Personal books belong to a single user; family books are shared with every
/// member of the owning family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountBookKind {
    #[default]
    Personal,
    Family,
}

impl AccountBookKind {
    /// Returns the stored representation of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Personal => "PERSONAL",
            Self::Family => "FAMILY",
        }
    }

    /// Human-readable label shown on the binding pages and chat replies.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Personal => "个人账本",
            Self::Family => "家庭账本",
        }
    }
}

impl std::fmt::Display for AccountBookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AccountBookKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PERSONAL" => Ok(Self::Personal),
            "FAMILY" => Ok(Self::Family),
            _ => Err(format!("invalid account book kind: {s}")),
        }
    }
}

// Queries cast the column with `type::text`, so the kind decodes from TEXT.
#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for AccountBookKind {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for AccountBookKind {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(s.parse()?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str() {
        assert_eq!(
            "FAMILY".parse::<AccountBookKind>().unwrap(),
            AccountBookKind::Family
        );
        assert!("family".parse::<AccountBookKind>().is_err());
    }

    #[test]
    fn test_serde_uses_stored_names() {
        let json = serde_json::to_string(&AccountBookKind::Personal).unwrap();
        assert_eq!(json, "\"PERSONAL\"");
    }
}
