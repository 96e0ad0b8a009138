//! Assembles cluster URL, container, path, and query into a normalised absolute URI.

// self
use crate::{_prelude::*, error::ValidationError};

/// Builds an absolute URI from a base cluster URL, a container name, a path inside that
/// container, and an optional query string.
///
/// Path segments are normalised (repeated slashes collapsed, `.`/`..` left untouched since
/// the server owns path semantics) but a trailing slash on the input path is preserved, since
/// v3io uses it to distinguish directories from objects.
pub fn build(base: &Url, container: &str, path: &str, query: Option<&str>) -> Result<Url, Error> {
	if container.is_empty() {
		return Err(ValidationError::EmptyContainer.into());
	}

	let mut url = base.clone();
	let trailing_slash = path.ends_with('/');
	let mut segments: Vec<&str> = Vec::new();

	segments.push(container.trim_matches('/'));
	segments.extend(path.split('/').filter(|s| !s.is_empty()));

	let mut joined = segments.join("/");

	if trailing_slash && !joined.ends_with('/') {
		joined.push('/');
	}
	if !joined.starts_with('/') {
		joined.insert(0, '/');
	}

	url.set_path(&joined);
	url.set_query(query);

	Ok(url)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_prelude::*;

	#[test]
	fn builds_normalised_uri_with_trailing_slash_preserved() {
		let base = Url::parse("https://h/").expect("Base URL fixture should parse.");
		let url =
			build(&base, "c", "/a//b/", Some("k=v")).expect("URI should build successfully.");

		assert_eq!(url.as_str(), "https://h/c/a/b/?k=v");
		assert_eq!(url.query(), Some("k=v"));
	}

	#[test]
	fn builds_uri_without_trailing_slash() {
		let base = Url::parse("https://h/").expect("Base URL fixture should parse.");
		let url = build(&base, "c", "/a/b", None).expect("URI should build successfully.");

		assert_eq!(url.as_str(), "https://h/c/a/b");
	}

	#[test]
	fn rejects_empty_container() {
		let base = Url::parse("https://h/").expect("Base URL fixture should parse.");
		let err = build(&base, "", "/a", None).expect_err("Empty container must be rejected.");

		assert!(matches!(err, Error::Validation(ValidationError::EmptyContainer)));
	}
}
