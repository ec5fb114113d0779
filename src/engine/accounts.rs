//! Account enumeration and removal.

// self
use crate::{
	_prelude::*,
	auth::{AccountIdentity, HomeAccountId},
	authority::AuthorityAliases,
	engine::TokenEngine,
	http::TokenHttpClient,
	oauth::TransportErrorMapper,
};

impl<C, M> TokenEngine<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Accounts this application can acquire tokens for silently.
	///
	/// An account counts only while a refresh token usable by this application (its own or a
	/// family token) is cached; each subject is listed once even when it is known in several
	/// tenants or under several environment aliases.
	pub async fn accounts(&self) -> Result<Vec<AccountIdentity>> {
		let aliases = self.aliases(&self.config.authority).await?;

		self.accounts_in(&aliases)
	}

	/// Removes every credential this application holds for `account`.
	///
	/// Access tokens, id tokens, the account records, and the refresh tokens this application
	/// would redeem are deleted. Application metadata survives.
	pub async fn remove_account(&self, account: &AccountIdentity) -> Result<()> {
		let aliases = self.aliases(&self.config.authority).await?;
		let home_account_id = &account.home_account_id;
		let client_id = self.client_id();
		let access_tokens = self.store.get_all_access_tokens(|record| {
			aliases.contains(&record.environment)
				&& record.client_id == *client_id
				&& record.belongs_to(Some(home_account_id))
		})?;

		for record in access_tokens {
			self.store.delete_access_token(&record.key())?;
		}

		let id_tokens = self.store.get_all_id_tokens(|record| {
			aliases.contains(&record.environment)
				&& record.client_id == *client_id
				&& record.home_account_id == *home_account_id
		})?;

		for record in id_tokens {
			self.store.delete_id_token(&record.key())?;
		}

		while let Some(record) = self.find_refresh_token(&aliases, home_account_id)? {
			if !self.store.delete_refresh_token(&record.key())? {
				break;
			}
		}

		let accounts = self.store.get_all_accounts(|record| {
			aliases.contains(&record.environment) && record.home_account_id == *home_account_id
		})?;

		for record in accounts {
			self.store.delete_account(&record.key())?;
		}

		Ok(())
	}

	pub(super) fn accounts_in(&self, aliases: &AuthorityAliases) -> Result<Vec<AccountIdentity>> {
		let mut records = self.store.get_all_accounts(|record| aliases.contains(&record.environment))?;

		// Prefer the home-tenant view, then the preferred alias.
		records.sort_by_key(|record| {
			(
				record.home_account_id.tenant_id() != Some(record.realm.as_ref()),
				aliases.rank(&record.environment).unwrap_or(usize::MAX),
			)
		});

		let mut seen = BTreeSet::<HomeAccountId>::new();
		let mut accounts = Vec::new();

		for record in records {
			if !seen.insert(record.home_account_id.clone()) {
				continue;
			}
			if self.find_refresh_token(aliases, &record.home_account_id)?.is_some() {
				accounts.push(record.identity());
			}
		}

		Ok(accounts)
	}
}
