//! URL roots for Instagram's OAuth and Graph services.
//!
//! Production values come from `Default`; tests point both roots at a mock
//! server with `Endpoints::with_base`.

/// Graph API version used for all versioned routes.
pub const API_VERSION: &str = "v19.0";

#[derive(Debug, Clone)]
pub struct Endpoints {
    /// Host of the OAuth authorize/short-lived token routes.
    pub api_root: String,
    /// Host of the Graph API, long-lived token and refresh routes.
    pub graph_root: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_root: "https://api.instagram.com".to_string(),
            graph_root: "https://graph.instagram.com".to_string(),
        }
    }
}

impl Endpoints {
    /// Serve every route from one base URL.
    #[cfg(test)]
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            api_root: base.clone(),
            graph_root: base,
        }
    }

    pub fn authorize(&self) -> String {
        format!("{}/oauth/authorize", self.api_root)
    }

    pub fn short_lived_token(&self) -> String {
        format!("{}/oauth/access_token", self.api_root)
    }

    pub fn long_lived_token(&self) -> String {
        format!("{}/access_token", self.graph_root)
    }

    pub fn refresh_token(&self) -> String {
        format!("{}/refresh_access_token", self.graph_root)
    }

    /// `{graph}/{version}/{path}`
    pub fn graph(&self, path: &str) -> String {
        format!("{}/{}/{}", self.graph_root, API_VERSION, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_routes() {
        let endpoints = Endpoints::default();
        assert_eq!(
            endpoints.authorize(),
            "https://api.instagram.com/oauth/authorize"
        );
        assert_eq!(
            endpoints.refresh_token(),
            "https://graph.instagram.com/refresh_access_token"
        );
        assert_eq!(
            endpoints.graph("123/media"),
            "https://graph.instagram.com/v19.0/123/media"
        );
    }

    #[test]
    fn test_with_base_trims_slash() {
        let endpoints = Endpoints::with_base("http://127.0.0.1:9999/");
        assert_eq!(
            endpoints.long_lived_token(),
            "http://127.0.0.1:9999/access_token"
        );
        assert_eq!(
            endpoints.short_lived_token(),
            "http://127.0.0.1:9999/oauth/access_token"
        );
    }
}
