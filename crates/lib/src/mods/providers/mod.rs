//! Built-in providers.

pub mod curseforge;
pub mod hangar;
pub mod modrinth;

pub use curseforge::CurseForgeProvider;
pub use hangar::HangarProvider;
pub use modrinth::ModrinthProvider;

use reqwest::Url;

use super::ModError;

/// `endpoint` extended by `segments`, each percent-encoded as a single path
/// segment so slugs cannot reshape the request path.
pub(crate) fn endpoint_url(endpoint: &str, segments: &[&str]) -> Result<Url, ModError> {
  let invalid = || ModError::InvalidEndpoint(endpoint.to_string());
  let mut url = Url::parse(endpoint).map_err(|_| invalid())?;
  url
    .path_segments_mut()
    .map_err(|_| invalid())?
    .pop_if_empty()
    .extend(segments);
  Ok(url)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn segments_are_appended_to_the_endpoint_path() {
    let url = endpoint_url("https://api.modrinth.com/v2", &["project", "sodium", "version"]).unwrap();
    assert_eq!(url.as_str(), "https://api.modrinth.com/v2/project/sodium/version");

    let url = endpoint_url("http://127.0.0.1:4000", &["projects"]).unwrap();
    assert_eq!(url.as_str(), "http://127.0.0.1:4000/projects");
  }

  #[test]
  fn slugs_cannot_escape_their_segment() {
    let url = endpoint_url("https://hangar.papermc.io/api/v1", &["projects", "a b/c?d#e", "versions"]).unwrap();
    assert_eq!(
      url.as_str(),
      "https://hangar.papermc.io/api/v1/projects/a%20b%2Fc%3Fd%23e/versions"
    );
  }

  #[test]
  fn unusable_endpoint_is_an_error() {
    assert!(matches!(
      endpoint_url("not a url", &["x"]),
      Err(ModError::InvalidEndpoint(_))
    ));
  }
}
