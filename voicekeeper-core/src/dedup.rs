// ABOUTME: Groups accounts by credential so only one session runs per token
// ABOUTME: The first account per credential is active; later duplicates are rejected and logged

use crate::config::Account;

/// Accounts that share one credential
#[derive(Debug, Clone)]
pub struct CredentialGroup {
    /// The account that will run
    pub active: Account,
    /// Accounts skipped because they reuse `active`'s credential
    pub rejected: Vec<Account>,
}

impl CredentialGroup {
    pub fn credential(&self) -> &str {
        &self.active.credential
    }
}

/// Credential groups in first-seen order. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct CredentialGroups {
    groups: Vec<CredentialGroup>,
}

impl CredentialGroups {
    /// Group `accounts` by credential, preserving their order.
    pub fn from_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let mut groups: Vec<CredentialGroup> = Vec::new();

        for account in accounts {
            match groups
                .iter_mut()
                .find(|group| group.credential() == account.credential)
            {
                Some(group) => {
                    tracing::warn!(
                        account = %account.id,
                        active = %group.active.id,
                        "Duplicate token, skipping account to keep the existing session alive"
                    );
                    group.rejected.push(account);
                }
                None => groups.push(CredentialGroup {
                    active: account,
                    rejected: Vec::new(),
                }),
            }
        }

        Self { groups }
    }

    pub fn groups(&self) -> &[CredentialGroup] {
        &self.groups
    }

    /// One account per credential, in first-seen order
    pub fn active_accounts(&self) -> impl Iterator<Item = &Account> {
        self.groups.iter().map(|group| &group.active)
    }

    /// IDs of every rejected account, in input order within each group
    pub fn rejected_ids(&self) -> Vec<&str> {
        self.groups
            .iter()
            .flat_map(|group| group.rejected.iter().map(|a| a.id.as_str()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }
}
