//! Host + path templates.
//!
//! A template is written as `host/path`, for example `users.roblox.com/v1/users/{id}/*`.
//!
//! Host part:
//! - `*` matches any host
//! - `*.roblox.com` matches `roblox.com` and any subdomain of it
//! - anything else must match exactly (case-insensitive)
//!
//! Path part (optional, a template without a path matches every path):
//! - static segments: `/v1/users`
//! - placeholders: `/v1/users/{id}` match exactly one segment
//! - wildcards: `/v1/*/friends` match exactly one segment
//! - trailing splat: `/v1/users/*` matches zero or more remaining segments

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum TemplateError {
    #[error("template is empty")]
    Empty,
    #[error("template has an empty host")]
    EmptyHost,
    #[error("invalid path segment: {0}")]
    InvalidSegment(String),
}

#[derive(Debug, PartialEq)]
enum HostMatcher {
    Any,
    Exact(String),
    Suffix(String),
}

impl HostMatcher {
    fn parse(host: &str) -> Result<Self, TemplateError> {
        let host = host.trim().to_ascii_lowercase();
        if host.is_empty() {
            return Err(TemplateError::EmptyHost);
        }
        if host == "*" {
            return Ok(HostMatcher::Any);
        }
        match host.strip_prefix("*.") {
            Some("") => Err(TemplateError::EmptyHost),
            Some(suffix) => Ok(HostMatcher::Suffix(suffix.to_string())),
            None => Ok(HostMatcher::Exact(host)),
        }
    }

    fn matches(&self, host: &str) -> bool {
        match self {
            HostMatcher::Any => true,
            HostMatcher::Exact(expected) => host.eq_ignore_ascii_case(expected),
            HostMatcher::Suffix(suffix) => is_same_or_subdomain(host, suffix),
        }
    }
}

/// Returns true if `host` equals `domain` or is a subdomain of it.
pub fn is_same_or_subdomain(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.');
    let domain = domain.trim_start_matches('.').trim_end_matches('.');
    if domain.is_empty() {
        return false;
    }
    if host.eq_ignore_ascii_case(domain) {
        return true;
    }
    let (host, domain) = (host.as_bytes(), domain.as_bytes());
    host.len() > domain.len()
        && host[host.len() - domain.len()..].eq_ignore_ascii_case(domain)
        && host[host.len() - domain.len() - 1] == b'.'
}

#[derive(Debug, PartialEq)]
enum PathSegment {
    Static(String),
    Param,
    Wildcard,
}

#[derive(Debug)]
struct Path {
    segments: Vec<PathSegment>,
    has_trailing_splat: bool,
}

impl Path {
    fn parse(path_str: &str) -> Result<Self, TemplateError> {
        let mut normalized_path = path_str.trim().trim_matches('/');

        let mut has_trailing_splat = false;
        if normalized_path == "*" {
            has_trailing_splat = true;
            normalized_path = "";
        } else if let Some(stripped) = normalized_path.strip_suffix("/*") {
            has_trailing_splat = true;
            normalized_path = stripped;
        }

        let segments = if normalized_path.is_empty() {
            vec![]
        } else {
            normalized_path
                .split('/')
                .map(PathSegment::parse)
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Path {
            segments,
            has_trailing_splat,
        })
    }

    fn matches(&self, request_path: &str) -> bool {
        let normalized_path = request_path.trim().trim_matches('/');

        let request_segments: Vec<&str> = if normalized_path.is_empty() {
            vec![]
        } else {
            normalized_path.split('/').collect()
        };

        if request_segments.len() < self.segments.len() {
            return false;
        }
        if !self.has_trailing_splat && request_segments.len() != self.segments.len() {
            return false;
        }

        self.segments
            .iter()
            .zip(request_segments)
            .all(|(seg, req_segment)| match seg {
                PathSegment::Static(s) => s == req_segment,
                PathSegment::Param | PathSegment::Wildcard => !req_segment.is_empty(),
            })
    }
}

impl PathSegment {
    fn parse(s: &str) -> Result<Self, TemplateError> {
        if s == "*" {
            return Ok(PathSegment::Wildcard);
        }
        if let Some(name) = s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            if name.is_empty() || name.contains(['{', '}']) {
                return Err(TemplateError::InvalidSegment(s.to_string()));
            }
            return Ok(PathSegment::Param);
        }
        if s.is_empty() || s.contains('*') {
            return Err(TemplateError::InvalidSegment(s.to_string()));
        }
        Ok(PathSegment::Static(s.to_string()))
    }
}

/// A parsed `host/path` template.
#[derive(Debug)]
pub struct Template {
    host: HostMatcher,
    path: Option<Path>,
}

impl Template {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let template = template.trim();
        if template.is_empty() {
            return Err(TemplateError::Empty);
        }

        let (host, path) = split_key(template);
        let host = HostMatcher::parse(host)?;
        let path = match path {
            Some(p) => Some(Path::parse(p)?),
            None => None,
        };

        Ok(Template { host, path })
    }

    pub fn matches(&self, host: &str, path: &str) -> bool {
        if !self.host.matches(host) {
            return false;
        }
        match &self.path {
            Some(p) => p.matches(path),
            None => true,
        }
    }

    /// Matches a key of the form `host/path`.
    pub fn matches_key(&self, key: &str) -> bool {
        let (host, path) = split_key(key);
        self.matches(host, path.unwrap_or("/"))
    }
}

/// Splits `host/path` into its host and (slash-prefixed) path.
pub fn split_key(key: &str) -> (&str, Option<&str>) {
    match key.find('/') {
        Some(idx) => (&key[..idx], Some(&key[idx..])),
        None => (key, None),
    }
}

#[derive(Debug)]
pub struct Rule<A> {
    template: Template,
    action: A,
}

impl<A> Rule<A> {
    pub fn new(template: Template, action: A) -> Self {
        Self { template, action }
    }

    pub fn action(&self) -> &A {
        &self.action
    }
}

/// Ordered rules, the first matching rule wins.
#[derive(Debug)]
pub struct Rules<A> {
    rules: Vec<Rule<A>>,
}

impl<A> Rules<A> {
    pub fn new(rules: Vec<Rule<A>>) -> Self {
        Self { rules }
    }

    pub fn first_match(&self, key: &str) -> Option<&A> {
        self.rules
            .iter()
            .find(|rule| rule.template.matches_key(key))
            .map(Rule::action)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
