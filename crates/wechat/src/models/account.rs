//! Read-only views of the main application's account records.

use serde::Serialize;

use zhiweijz_core::{AccountBookId, AccountBookKind, Email, UserId};

/// An internal user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountUser {
    pub id: UserId,
    pub name: String,
    pub email: Email,
    pub is_active: bool,
}

impl AccountUser {
    /// Name shown on pages and in chat, falling back to the masked email.
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.name.trim().is_empty() {
            self.email.masked()
        } else {
            self.name.clone()
        }
    }
}

/// An account book the user can record into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct AccountBook {
    pub id: AccountBookId,
    pub name: String,
    pub kind: AccountBookKind,
    pub is_default: bool,
    /// Owning family for shared books
    pub family_name: Option<String>,
}

impl AccountBook {
    /// Label such as `[个人账本]` or `[家庭账本-张家]`.
    #[must_use]
    pub fn kind_label(&self) -> String {
        match (self.kind, self.family_name.as_deref()) {
            (AccountBookKind::Family, Some(family)) if !family.is_empty() => {
                format!("[{}-{family}]", self.kind.label())
            }
            (kind, _) => format!("[{}]", kind.label()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn book(kind: AccountBookKind, family_name: Option<&str>) -> AccountBook {
        AccountBook {
            id: AccountBookId::generate(),
            name: "日常".to_string(),
            kind,
            is_default: false,
            family_name: family_name.map(String::from),
        }
    }

    #[test]
    fn test_kind_label() {
        assert_eq!(book(AccountBookKind::Personal, None).kind_label(), "[个人账本]");
        assert_eq!(
            book(AccountBookKind::Family, Some("张家")).kind_label(),
            "[家庭账本-张家]"
        );
        assert_eq!(book(AccountBookKind::Family, None).kind_label(), "[家庭账本]");
    }

    #[test]
    fn test_display_name_falls_back_to_masked_email() {
        let user = AccountUser {
            id: UserId::generate(),
            name: "  ".to_string(),
            email: Email::parse("zhangsan@qq.com").unwrap(),
            is_active: true,
        };
        assert_eq!(user.display_name(), "z***n@qq.com");
    }
}
