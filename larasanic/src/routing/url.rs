//! URL generation for paths, named routes, assets and signed links.
//!
//! The generator is shared through `AppState`, so everything it can change after boot
//! (the route table, the forced root and scheme) lives behind `arc_swap` cells.

use arc_swap::{ArcSwap, ArcSwapOption};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};
use url::form_urlencoded;

use super::{
    collection::RouteCollection,
    route::{Segment, normalize_uri, parse_segments},
};
use crate::{
    crypto::{hmac_hex, verify_hmac_hex},
    errors::{Error, Result},
};

const SIGNATURE_PARAM: &str = "signature";
const EXPIRES_PARAM: &str = "expires";

fn is_absolute(path: &str) -> bool {
    path.contains("://") || path.starts_with("//")
}

fn encode_segment(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

fn encode_query<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    form_urlencoded::Serializer::new(String::new()).extend_pairs(pairs).finish()
}

fn append_query(url: &str, query: &str) -> String {
    if query.is_empty() {
        url.to_string()
    } else if url.contains('?') {
        format!("{url}&{query}")
    } else {
        format!("{url}?{query}")
    }
}

#[derive(Debug)]
pub struct UrlGenerator {
    /// Route name to uri pattern
    routes: ArcSwap<HashMap<String, String>>,
    root: ArcSwap<String>,
    forced_root: ArcSwapOption<String>,
    forced_scheme: ArcSwapOption<String>,
    secret: Option<String>,
}

impl UrlGenerator {
    pub fn new(app_url: &str, secret: Option<String>) -> Self {
        Self {
            routes: ArcSwap::from_pointee(HashMap::new()),
            root: ArcSwap::from_pointee(app_url.trim_end_matches('/').to_string()),
            forced_root: ArcSwapOption::empty(),
            forced_scheme: ArcSwapOption::empty(),
            secret,
        }
    }

    /// Take a snapshot of the named routes.
    pub fn set_routes(&self, routes: &RouteCollection) {
        self.routes.store(Arc::new(routes.named_uris()));
    }

    pub fn force_scheme(&self, scheme: &str) {
        let scheme = scheme.trim_end_matches("://").to_ascii_lowercase();
        self.forced_scheme.store(Some(Arc::new(scheme)));
    }

    pub fn force_root_url(&self, root: &str) {
        self.forced_root.store(Some(Arc::new(root.trim_end_matches('/').to_string())));
    }

    /// Root URL after any forced root and scheme are applied.
    pub fn current_root(&self) -> String {
        let root = match self.forced_root.load_full() {
            Some(root) => root.as_ref().clone(),
            None => self.root.load().as_ref().clone(),
        };
        match self.forced_scheme.load_full() {
            Some(scheme) => with_scheme(&root, &scheme),
            None => root,
        }
    }

    /// URL for a path, with `secure` forcing `https` (or `http` when false).
    pub fn to(&self, path: &str, query: &[(&str, &str)], secure: Option<bool>) -> String {
        if is_absolute(path) {
            return append_query(path, &encode_query(query.iter().copied()));
        }

        let mut root = self.current_root();
        if let Some(secure) = secure {
            root = with_scheme(&root, if secure { "https" } else { "http" });
        }
        let url = if path.is_empty() || path == "/" {
            root
        } else {
            format!("{root}/{}", path.trim_start_matches('/'))
        };
        append_query(&url, &encode_query(query.iter().copied()))
    }

    /// URL for a named route. Parameters the route does not use become the query string.
    pub fn route(&self, name: &str, params: &BTreeMap<String, String>, absolute: bool) -> Result<String> {
        let routes = self.routes.load();
        let uri = routes.get(name).ok_or_else(|| Error::NotFound {
            resource: "route".to_string(),
            id: name.to_string(),
        })?;

        let mut used = Vec::new();
        let mut segments = Vec::new();
        for segment in parse_segments(uri) {
            match segment {
                Segment::Static(s) => segments.push(s),
                Segment::Param { name: param, optional } => match params.get(&param) {
                    Some(value) => {
                        segments.push(encode_segment(value));
                        used.push(param);
                    }
                    None if optional => {}
                    None => {
                        return Err(Error::BadRequest {
                            message: format!("Missing required parameter '{param}' for route '{name}'"),
                        });
                    }
                },
            }
        }

        let path = normalize_uri(&segments.join("/"));
        let query = encode_query(
            params
                .iter()
                .filter(|(k, _)| !used.contains(k))
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );
        let path = append_query(&path, &query);

        if absolute {
            Ok(self.to(&path, &[], None))
        } else {
            Ok(path)
        }
    }

    /// Public URL of a file under `public/`.
    pub fn asset(&self, path: &str) -> String {
        format!("{}/{}", self.current_root(), path.trim_start_matches('/'))
    }

    fn secret(&self) -> Result<&str> {
        self.secret.as_deref().ok_or_else(|| Error::Internal {
            operation: "sign URL: no application secret configured".to_string(),
        })
    }

    /// Absolute route URL carrying an HMAC signature, optionally expiring.
    pub fn signed_route(
        &self,
        name: &str,
        params: &BTreeMap<String, String>,
        expiration: Option<Duration>,
    ) -> Result<String> {
        let secret = self.secret()?;
        let mut params = params.clone();
        if let Some(expiration) = expiration {
            let expires = chrono::Utc::now().timestamp() + expiration.as_secs() as i64;
            params.insert(EXPIRES_PARAM.to_string(), expires.to_string());
        }

        let url = self.route(name, &params, true)?;
        let signature = hmac_hex(secret, url.as_bytes());
        Ok(append_query(&url, &encode_query([(SIGNATURE_PARAM, signature.as_str())])))
    }

    /// Check a signed URL. Relative URLs are resolved against the current root.
    pub fn has_valid_signature(&self, url: &str) -> bool {
        let Ok(secret) = self.secret() else {
            return false;
        };
        let url = if is_absolute(url) {
            url.to_string()
        } else {
            self.to(url, &[], None)
        };

        let marker = format!("{SIGNATURE_PARAM}=");
        let Some(position) = url.rfind(&marker) else {
            return false;
        };
        let (unsigned, signature) = url.split_at(position);
        let Some(unsigned) = unsigned.strip_suffix('?').or_else(|| unsigned.strip_suffix('&')) else {
            return false;
        };
        let signature = &signature[marker.len()..];

        if !verify_hmac_hex(secret, unsigned.as_bytes(), signature) {
            return false;
        }

        let query = unsigned.split_once('?').map(|(_, q)| q).unwrap_or_default();
        let expires = form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == EXPIRES_PARAM)
            .map(|(_, v)| v.parse::<i64>());
        match expires {
            None => true,
            Some(Ok(expires)) => chrono::Utc::now().timestamp() <= expires,
            Some(Err(_)) => false,
        }
    }
}

fn with_scheme(root: &str, scheme: &str) -> String {
    match root.split_once("://") {
        Some((_, rest)) => format!("{scheme}://{rest}"),
        None => format!("{scheme}://{}", root.trim_start_matches('/')),
    }
}
