//! Requests as seen by the fetch handler.

use std::{fmt, str::FromStr};

use axum::http::{
  Method, Uri,
  uri::{Authority, Scheme},
};

use crate::{Error, Result};

/// The `Sec-Fetch-Mode` of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  /// A top-level page load.
  Navigate,
  #[default]
  SameOrigin,
  Cors,
  NoCors,
}

impl RequestMode {
  pub fn from_header(value: &str) -> Self {
    match value {
      "navigate" => Self::Navigate,
      "cors" => Self::Cors,
      "no-cors" => Self::NoCors,
      _ => Self::SameOrigin,
    }
  }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
  pub method: Method,
  /// Absolute URL.
  pub url:    Uri,
  pub mode:   RequestMode,
  pub accept: Option<String>,
}

impl FetchRequest {
  /// A plain `GET` for an absolute URL.
  pub fn get(url: &str) -> Result<Self> {
    let url: Uri = url
      .parse()
      .map_err(|e| Error::InvalidOrigin(format!("{url}: {e}")))?;
    Ok(Self {
      method: Method::GET,
      url,
      mode: RequestMode::default(),
      accept: None,
    })
  }

  /// A page navigation to an absolute URL.
  pub fn navigate(url: &str) -> Result<Self> {
    Ok(Self { mode: RequestMode::Navigate, ..Self::get(url)? })
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
    self.accept = Some(accept.into());
    self
  }

  pub fn path(&self) -> &str { self.url.path() }

  /// Path plus query; the key responses are cached under.
  pub fn cache_key(&self) -> String {
    self
      .url
      .path_and_query()
      .map_or_else(|| "/".to_owned(), |pq| pq.as_str().to_owned())
  }

  /// Navigations and anything asking for HTML.
  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
      || self.accept.as_deref().is_some_and(|a| a.contains("text/html"))
  }
}

/// The scheme and authority the shell is served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
  scheme:    Scheme,
  authority: Authority,
}

impl Origin {
  /// Whether `url` is same-origin and `http(s)`.
  pub fn contains(&self, url: &Uri) -> bool {
    matches!(url.scheme_str(), Some("http" | "https"))
      && url.scheme() == Some(&self.scheme)
      && url.authority() == Some(&self.authority)
  }

  /// An absolute URL for `path_and_query` on this origin.
  pub fn join(&self, path_and_query: &str) -> Result<Uri> {
    Uri::builder()
      .scheme(self.scheme.clone())
      .authority(self.authority.clone())
      .path_and_query(path_and_query)
      .build()
      .map_err(|e| Error::InvalidOrigin(format!("{path_and_query}: {e}")))
  }
}

impl FromStr for Origin {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let invalid = |why: &str| Error::InvalidOrigin(format!("{s}: {why}"));
    let uri: Uri = s.parse().map_err(|_| invalid("not a URL"))?;
    let parts = uri.into_parts();
    let scheme = parts.scheme.ok_or_else(|| invalid("missing scheme"))?;
    if scheme != Scheme::HTTP && scheme != Scheme::HTTPS {
      return Err(invalid("scheme must be http or https"));
    }
    let authority = parts.authority.ok_or_else(|| invalid("missing host"))?;
    Ok(Self { scheme, authority })
  }
}

impl fmt::Display for Origin {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}://{}", self.scheme, self.authority)
  }
}
