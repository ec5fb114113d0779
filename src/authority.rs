//! Authorities, cloud aliases, and single-flight instance discovery.
//!
//! Alias *resolution* is a collaborator behind [`AliasResolver`]; this module owns the glue:
//! parsing authorities, answering "is this host the same cloud", and making sure concurrent
//! callers share one in-flight resolution per host.

// crates.io
use async_lock::OnceCell;
// self
use crate::{
	_prelude::*,
	auth::{Environment, IdentifierError, TenantId},
};

/// Boxed future returned by [`AliasResolver::resolve`].
pub type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Result<AuthorityAliases>> + 'a + Send>>;

/// Errors raised while parsing an authority URL.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum AuthorityError {
	/// The value is not a URL.
	#[error("Authority is not a valid URL: {reason}.")]
	InvalidUrl {
		/// Parser message.
		reason: String,
	},
	/// Only HTTPS is accepted, except plain HTTP on loopback hosts.
	#[error("Authority must use HTTPS: {url}.")]
	InsecureScheme {
		/// Offending URL.
		url: String,
	},
	/// The URL has no host.
	#[error("Authority has no host: {url}.")]
	MissingHost {
		/// Offending URL.
		url: String,
	},
	/// The first path segment (tenant) is missing.
	#[error("Authority has no tenant segment: {url}.")]
	MissingTenant {
		/// Offending URL.
		url: String,
	},
	/// The host or tenant failed identifier validation.
	#[error(transparent)]
	Identifier(#[from] IdentifierError),
}
impl From<AuthorityError> for Error {
	fn from(e: AuthorityError) -> Self {
		Self::invalid_argument("authority", e.to_string())
	}
}

/// Token issuer: a cloud instance plus a tenant (or multi-tenant alias).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Authority {
	scheme: String,
	environment: Environment,
	port: Option<u16>,
	tenant: TenantId,
}
impl Authority {
	/// Parses `https://{host}/{tenant}`; extra path segments are ignored.
	pub fn parse(raw: &str) -> Result<Self, AuthorityError> {
		let url = Url::parse(raw).map_err(|e| AuthorityError::InvalidUrl { reason: e.to_string() })?;

		Self::from_url(&url)
	}

	/// Builds an authority from an already parsed URL.
	pub fn from_url(url: &Url) -> Result<Self, AuthorityError> {
		let host = url.host_str().ok_or_else(|| AuthorityError::MissingHost { url: url.to_string() })?;
		let secure = match url.scheme() {
			"https" => true,
			"http" => is_loopback(host),
			_ => false,
		};

		if !secure {
			return Err(AuthorityError::InsecureScheme { url: url.to_string() });
		}

		let tenant = url
			.path_segments()
			.and_then(|mut segments| segments.find(|segment| !segment.is_empty()))
			.ok_or_else(|| AuthorityError::MissingTenant { url: url.to_string() })?;

		Ok(Self {
			scheme: url.scheme().to_owned(),
			environment: Environment::new(host)?,
			port: url.port(),
			tenant: TenantId::new(tenant)?,
		})
	}

	/// Cloud instance host used to partition the cache.
	pub fn environment(&self) -> &Environment {
		&self.environment
	}

	/// Tenant segment, possibly a multi-tenant alias.
	pub fn tenant(&self) -> &TenantId {
		&self.tenant
	}

	/// `true` for `common`, `organizations`, and `consumers` authorities.
	pub fn is_multi_tenant(&self) -> bool {
		self.tenant.is_multi_tenant_alias()
	}

	/// Same cloud, different tenant.
	pub fn with_tenant(&self, tenant: TenantId) -> Self {
		Self { tenant, ..self.clone() }
	}

	/// Token endpoint on `host` (normally the preferred network alias of this environment).
	pub fn token_endpoint(&self, host: &str) -> Result<Url> {
		let raw = format!("{}/{}/oauth2/v2.0/token", self.origin(host), self.tenant);

		Url::parse(&raw).map_err(|e| Error::invalid_argument("authority", e.to_string()))
	}

	/// Authorization endpoint on the canonical host.
	pub fn authorization_endpoint(&self) -> Result<Url> {
		let raw = format!("{}/{}/oauth2/v2.0/authorize", self.origin(&self.environment), self.tenant);

		Url::parse(&raw).map_err(|e| Error::invalid_argument("authority", e.to_string()))
	}

	fn origin(&self, host: &str) -> String {
		match self.port {
			Some(port) => format!("{}://{host}:{port}", self.scheme),
			None => format!("{}://{host}", self.scheme),
		}
	}
}
impl Debug for Authority {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "Authority({self})")
	}
}
impl Display for Authority {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}/{}", self.origin(&self.environment), self.tenant)
	}
}
impl FromStr for Authority {
	type Err = AuthorityError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}
impl TryFrom<String> for Authority {
	type Error = AuthorityError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::parse(&value)
	}
}
impl From<Authority> for String {
	fn from(value: Authority) -> Self {
		value.to_string()
	}
}

/// Hosts that name the same cloud instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityAliases {
	/// Host network calls should be sent to.
	pub preferred_network: String,
	/// Host new cache entries are written under.
	pub preferred_cache: String,
	/// Every equivalent host, lower-cased, in preference order.
	pub aliases: Vec<String>,
}
impl AuthorityAliases {
	/// Aliases of a host nobody knows about: only itself.
	pub fn single(host: &str) -> Self {
		let host = host.to_ascii_lowercase();

		Self { preferred_network: host.clone(), preferred_cache: host.clone(), aliases: vec![host] }
	}

	/// `true` if `environment` is one of the aliases.
	pub fn contains(&self, environment: &str) -> bool {
		self.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(environment))
	}

	/// Preference rank of `environment`; lower is better.
	pub fn rank(&self, environment: &str) -> Option<usize> {
		self.aliases.iter().position(|alias| alias.eq_ignore_ascii_case(environment))
	}

	/// Environment new entries are cached under.
	pub fn cache_environment(&self) -> Result<Environment> {
		Ok(Environment::new(&self.preferred_cache)?)
	}
}

/// Resolves a host into its equivalent cloud hosts.
pub trait AliasResolver
where
	Self: Send + Sync,
{
	/// Resolves `host`; failures are not cached and the next caller retries.
	fn resolve<'a>(&'a self, host: &'a str) -> ResolveFuture<'a>;
}

/// Offline resolver that knows the well-known public and sovereign clouds.
#[derive(Clone, Debug, Default)]
pub struct KnownCloudsResolver;
impl KnownCloudsResolver {
	const CLOUDS: &'static [(&'static str, &'static str, &'static [&'static str])] = &[
		(
			"login.microsoftonline.com",
			"login.windows.net",
			&["login.microsoftonline.com", "login.windows.net", "login.microsoft.com", "sts.windows.net"],
		),
		("login.partner.microsoftonline.cn", "login.partner.microsoftonline.cn", &[
			"login.partner.microsoftonline.cn",
			"login.chinacloudapi.cn",
		]),
		("login.microsoftonline.de", "login.microsoftonline.de", &["login.microsoftonline.de"]),
		("login.microsoftonline.us", "login.microsoftonline.us", &[
			"login.microsoftonline.us",
			"login.usgovcloudapi.net",
		]),
	];

	/// Looks a host up in the built-in table without allocating a future.
	pub fn lookup(host: &str) -> AuthorityAliases {
		Self::CLOUDS
			.iter()
			.find(|(_, _, aliases)| aliases.iter().any(|alias| alias.eq_ignore_ascii_case(host)))
			.map(|(network, cache, aliases)| AuthorityAliases {
				preferred_network: (*network).to_owned(),
				preferred_cache: (*cache).to_owned(),
				aliases: aliases.iter().map(|alias| (*alias).to_owned()).collect(),
			})
			.unwrap_or_else(|| AuthorityAliases::single(host))
	}
}
impl AliasResolver for KnownCloudsResolver {
	fn resolve<'a>(&'a self, host: &'a str) -> ResolveFuture<'a> {
		Box::pin(async move { Ok(Self::lookup(host)) })
	}
}

/// Engine-owned discovery cache with per-host single-flight resolution.
///
/// Concurrent callers for an unknown host wait on the same in-flight resolution. A successful
/// result (including a "host is only itself" answer) is kept for the lifetime of the
/// instance; a failure leaves the slot empty.
pub struct InstanceDiscovery {
	resolver: Arc<dyn AliasResolver>,
	entries: Mutex<HashMap<String, Arc<OnceCell<AuthorityAliases>>>>,
}
impl InstanceDiscovery {
	/// Creates an empty discovery cache backed by `resolver`.
	pub fn new(resolver: Arc<dyn AliasResolver>) -> Self {
		Self { resolver, entries: Mutex::new(HashMap::new()) }
	}

	/// Aliases for `host`, resolving at most once per host.
	pub async fn aliases(&self, host: &str) -> Result<AuthorityAliases> {
		let host = host.to_ascii_lowercase();
		let cell = self.entries.lock().entry(host.clone()).or_default().clone();
		let aliases = cell.get_or_try_init(|| self.resolver.resolve(&host)).await?;

		Ok(aliases.clone())
	}

	/// Seeds the cache for every alias in `aliases`, e.g. from configuration.
	///
	/// Hosts that already hold a completed resolution keep it. Returns `false` when at least one
	/// alias was left untouched for that reason.
	pub fn seed(&self, aliases: AuthorityAliases) -> bool {
		let mut entries = self.entries.lock();
		let mut seeded_all = true;

		for alias in &aliases.aliases {
			let host = alias.to_ascii_lowercase();

			if entries.get(&host).is_some_and(|cell| cell.get().is_some()) {
				seeded_all = false;

				continue;
			}

			entries.insert(host, Arc::new(OnceCell::from(aliases.clone())));
		}

		seeded_all
	}

	/// Cached aliases for `host`, if a resolution already completed.
	pub fn cached(&self, host: &str) -> Option<AuthorityAliases> {
		self.entries.lock().get(&host.to_ascii_lowercase()).and_then(|cell| cell.get().cloned())
	}
}
impl Default for InstanceDiscovery {
	fn default() -> Self {
		Self::new(Arc::new(KnownCloudsResolver))
	}
}
impl Debug for InstanceDiscovery {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("InstanceDiscovery").field("hosts", &self.entries.lock().len()).finish()
	}
}

fn is_loopback(host: &str) -> bool {
	matches!(host, "localhost" | "127.0.0.1" | "[::1]" | "::1")
}
