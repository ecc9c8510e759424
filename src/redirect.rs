//! Redirect hop computation.

use crate::{options::RequestOptions, resolve::Target, Error, Result};
use url::Url;

/// Computes the URL of the next hop.
///
/// Absolute locations are used as they are. Rooted paths are appended to the
/// current hop's origin, and any other relative form is joined against the
/// current hop's URL.
pub(crate) fn next_url(current: &Target, location: &str) -> Result<String> {
    match Url::parse(location) {
        Ok(url) => Ok(url.into()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            if location.starts_with('/') && !location.starts_with("//") {
                Ok(format!("{}{}", current.origin(), location))
            } else {
                Ok(Url::parse(&current.href())?.join(location)?.into())
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Builds the options of the next hop.
///
/// The hop inherits everything from the current hop (headers, auth, method,
/// encoding, timeout, extra options) except the address, which comes from the
/// new URL, and the budget, which is one less.
pub(crate) fn next_hop(
    current: &RequestOptions,
    target: &Target,
    location: &str,
) -> Result<RequestOptions> {
    let remaining = match current.max_redirects {
        Some(0) => {
            return Err(Error::Redirect {
                location: location.to_string(),
                max_redirects: 0,
            })
        }
        Some(n) => Some(n - 1),
        None => None,
    };

    let mut hop = current.clone();
    hop.url = Some(next_url(target, location)?);
    hop.base_url = None;
    hop.protocol = None;
    hop.hostname = None;
    hop.port = None;
    hop.path = None;
    hop.max_redirects = remaining;
    Ok(hop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Protocol;
    use crate::resolve::resolve_target;

    fn target(url: &str) -> Target {
        resolve_target(&mut RequestOptions::new().with_url(url)).unwrap()
    }

    #[test]
    fn test_rooted_location_uses_current_origin() {
        let current = target("http://host:80/a");
        assert_eq!(next_url(&current, "/next").unwrap(), "http://host:80/next");
    }

    #[test]
    fn test_absolute_location_is_used_as_is() {
        let current = target("http://host/a");
        assert_eq!(
            next_url(&current, "https://elsewhere:8443/b?c=1").unwrap(),
            "https://elsewhere:8443/b?c=1"
        );
    }

    #[test]
    fn test_other_relative_locations_join() {
        let current = target("http://host:8080/dir/page");
        assert_eq!(next_url(&current, "other").unwrap(), "http://host:8080/dir/other");
        assert_eq!(next_url(&current, "//cdn/x").unwrap(), "http://cdn/x");
    }

    #[test]
    fn test_hop_decrements_budget_by_one() {
        let mut options = RequestOptions::new()
            .with_url("http://host:80/a")
            .with_max_redirects(3);
        let current = resolve_target(&mut options).unwrap();

        let hop = next_hop(&options, &current, "/next").unwrap();

        assert_eq!(hop.max_redirects, Some(2));
        assert_eq!(hop.url.as_deref(), Some("http://host:80/next"));
    }

    #[test]
    fn test_exhausted_budget_fails() {
        let mut options = RequestOptions::new()
            .with_url("http://host/a")
            .with_max_redirects(0);
        let current = resolve_target(&mut options).unwrap();

        let err = next_hop(&options, &current, "/next").unwrap_err();
        assert_eq!(err.code(), "REDIRECT");
    }

    #[test]
    fn test_unbounded_budget_stays_unbounded() {
        let mut options = RequestOptions::new().with_url("http://host/a");
        let current = resolve_target(&mut options).unwrap();
        assert_eq!(next_hop(&options, &current, "/b").unwrap().max_redirects, None);
    }

    #[test]
    fn test_absolute_hop_drops_inherited_address() {
        let mut options = RequestOptions::new()
            .with_url("http://u:p@host:8080/a")
            .with_header("x-keep", "1")
            .unwrap();
        let current = resolve_target(&mut options).unwrap();

        let mut hop = next_hop(&options, &current, "https://other/b").unwrap();
        let next = resolve_target(&mut hop).unwrap();

        assert_eq!(next.protocol, Protocol::Https);
        assert_eq!(next.hostname, "other");
        assert_eq!(next.port, 443);
        assert_eq!(hop.headers["x-keep"], "1");
        assert_eq!(hop.auth.as_ref().map(|a| a.as_str()), Some("u:p"));
    }
}
