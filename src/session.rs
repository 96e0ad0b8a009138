//! Authentication material attached to every data-plane operation.

// self
use crate::_prelude::*;

/// Holds authentication material for a tenant scope: the cluster URL plus either an
/// access key or basic credentials. Immutable after creation.
#[derive(Clone)]
pub struct Session {
	/// Base cluster URL (scheme + host, optionally with a trailing slash).
	pub url: Url,
	/// Authentication method used for every request issued under this session.
	pub auth: AuthMethod,
	/// Optional `User-Agent` override; defaults to the crate's own identifier.
	pub user_agent: Option<String>,
}
impl Session {
	/// Creates a new session for the given cluster URL and auth method.
	pub fn new(url: impl AsRef<str>, auth: AuthMethod) -> Result<Self, url::ParseError> {
		let url = Url::parse(url.as_ref())?;

		Ok(Self { url, auth, user_agent: None })
	}

	/// Overrides the `User-Agent` header sent with every request.
	pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
		self.user_agent = Some(user_agent.into());

		self
	}

	/// Returns every secret value this session must never leak into a log line or error
	/// message, for use with [`crate::error::HeaderRedactor`].
	pub fn secrets(&self) -> Vec<String> {
		match &self.auth {
			AuthMethod::AccessKey(key) => vec![key.clone()],
			AuthMethod::Basic { password, .. } => vec![password.clone()],
		}
	}
}
impl Debug for Session {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Session")
			.field("url", &self.url)
			.field("auth", &self.auth.kind())
			.field("user_agent", &self.user_agent)
			.finish()
	}
}

/// Authentication material supported by the data plane.
#[derive(Clone)]
pub enum AuthMethod {
	/// `X-v3io-session-key` header.
	AccessKey(String),
	/// HTTP basic credentials, sent as an `Authorization: Basic` header.
	Basic {
		/// Basic-auth username.
		username: String,
		/// Basic-auth password.
		password: String,
	},
}
impl AuthMethod {
	fn kind(&self) -> &'static str {
		match self {
			AuthMethod::AccessKey(_) => "access-key",
			AuthMethod::Basic { .. } => "basic",
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn session_debug_never_prints_the_secret() {
		let session =
			Session::new("https://cluster.example/", AuthMethod::AccessKey("top-secret".into()))
				.expect("Session fixture should parse.");
		let debug = format!("{session:?}");

		assert!(!debug.contains("top-secret"));
	}

	#[test]
	fn secrets_cover_both_auth_methods() {
		let access = Session::new("https://h/", AuthMethod::AccessKey("ak".into())).unwrap();

		assert_eq!(access.secrets(), vec!["ak".to_string()]);

		let basic = Session::new(
			"https://h/",
			AuthMethod::Basic { username: "u".into(), password: "p".into() },
		)
		.unwrap();

		assert_eq!(basic.secrets(), vec!["p".to_string()]);
	}
}
