//! Key-pattern routing.
//!
//! A [`RouteSet`] maps cache keys to the computation that produces them, so
//! `Cache::compute(key)` (and regeneration after an invalidation) can run
//! without the caller handing in a closure.
//!
//! # Pattern syntax
//!
//! ```text
//! users/{id}            {id} matches one non-empty segment (no '/')
//! files/{*path}         {*path} matches the rest of the key, '/' included
//! reports/daily         everything else is literal
//! ```
//!
//! Rules are tried in declaration order; the first match wins.

use futures_util::future::{BoxFuture, FutureExt};
use primer_core::{CacheKey, PrimerResult, RouteError};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Parameters handed to a route handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteParams {
    /// The key being computed.
    pub key: CacheKey,
    /// Named placeholder captures.
    pub captures: BTreeMap<String, String>,
}

impl RouteParams {
    /// Capture named `name`, if the pattern declared it.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.captures.get(name).map(String::as_str)
    }
}

type Handler<V> = Arc<dyn Fn(RouteParams) -> BoxFuture<'static, PrimerResult<Option<V>>> + Send + Sync>;

struct Route<V> {
    pattern: String,
    matcher: Regex,
    handler: Handler<V>,
}

impl<V> Clone for Route<V> {
    fn clone(&self) -> Self {
        Self {
            pattern: self.pattern.clone(),
            matcher: self.matcher.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

/// Ordered list of `(pattern, computation)` rules.
pub struct RouteSet<V> {
    routes: Vec<Route<V>>,
}

impl<V> Default for RouteSet<V> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<V> Clone for RouteSet<V> {
    fn clone(&self) -> Self {
        Self {
            routes: self.routes.clone(),
        }
    }
}

impl<V> RouteSet<V> {
    /// Patterns in declaration order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|route| route.pattern.as_str())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<V> fmt::Debug for RouteSet<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteSet")
            .field("patterns", &self.patterns().collect::<Vec<_>>())
            .finish()
    }
}

impl<V> RouteSet<V>
where
    V: Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule, builder style.
    ///
    /// ```ignore
    /// let routes = RouteSet::new()
    ///     .get("users/{id}", |params| async move { load_user(params.get("id")).await })?
    ///     .get("{*rest}", |_| async { Ok(None) })?;
    /// ```
    pub fn get<F, Fut>(mut self, pattern: &str, handler: F) -> PrimerResult<Self>
    where
        F: Fn(RouteParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PrimerResult<Option<V>>> + Send + 'static,
    {
        self.add(pattern, handler)?;
        Ok(self)
    }

    /// Append a rule.
    pub fn add<F, Fut>(&mut self, pattern: &str, handler: F) -> PrimerResult<()>
    where
        F: Fn(RouteParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PrimerResult<Option<V>>> + Send + 'static,
    {
        let matcher = compile_pattern(pattern)?;
        self.routes.push(Route {
            pattern: pattern.to_string(),
            matcher,
            handler: Arc::new(move |params| handler(params).boxed()),
        });
        Ok(())
    }

    /// Pattern of the first rule matching `key`, with its captures.
    pub fn resolve(&self, key: &CacheKey) -> Option<(&str, RouteParams)> {
        self.find(key)
            .map(|(route, params)| (route.pattern.as_str(), params))
    }

    /// Start the computation for `key`.
    ///
    /// The returned future has not been polled yet; the caller decides in
    /// which recording scope it runs.
    pub fn dispatch(&self, key: &CacheKey) -> PrimerResult<BoxFuture<'static, PrimerResult<Option<V>>>> {
        match self.find(key) {
            Some((route, params)) => Ok((route.handler)(params)),
            None => Err(RouteError::NotFound {
                key: key.to_string(),
                reason: "no pattern matches".to_string(),
            }
            .into()),
        }
    }

    /// Run the computation for `key`.
    pub async fn evaluate(&self, key: &CacheKey) -> PrimerResult<Option<V>> {
        self.dispatch(key)?.await
    }

    fn find(&self, key: &CacheKey) -> Option<(&Route<V>, RouteParams)> {
        self.routes.iter().find_map(|route| {
            let caps = route.matcher.captures(key.as_str())?;
            let captures = route
                .matcher
                .capture_names()
                .flatten()
                .filter_map(|name| {
                    caps.name(name)
                        .map(|m| (name.to_string(), m.as_str().to_string()))
                })
                .collect();
            Some((
                route,
                RouteParams {
                    key: key.clone(),
                    captures,
                },
            ))
        })
    }
}

fn invalid(pattern: &str, reason: impl Into<String>) -> RouteError {
    RouteError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.into(),
    }
}

fn is_placeholder_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Translate a route pattern into an anchored regex.
fn compile_pattern(pattern: &str) -> Result<Regex, RouteError> {
    if pattern.is_empty() {
        return Err(invalid(pattern, "pattern is empty"));
    }

    let mut source = String::from("^");
    let mut literal = String::new();
    let mut rest = pattern;

    while let Some(open) = rest.find(['{', '}']) {
        if rest[open..].starts_with('}') {
            return Err(invalid(pattern, "unmatched '}'"));
        }
        literal.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| invalid(pattern, "unterminated placeholder"))?;
        let body = &after[..close];
        let (name, greedy) = match body.strip_prefix('*') {
            Some(name) => (name, true),
            None => (body, false),
        };
        if !is_placeholder_name(name) {
            return Err(invalid(pattern, format!("bad placeholder name {body:?}")));
        }

        source.push_str(&regex::escape(&literal));
        literal.clear();
        let class = if greedy { ".+" } else { "[^/]+" };
        source.push_str(&format!("(?P<{name}>{class})"));
        rest = &after[close + 1..];
    }
    literal.push_str(rest);
    source.push_str(&regex::escape(&literal));
    source.push('$');

    Regex::new(&source).map_err(|e| invalid(pattern, e.to_string()))
}
