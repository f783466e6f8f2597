use async_trait::async_trait;

use super::{Command, Output};
use crate::{Application, routing::RouteCollection};

/// `route:list [--method] [--name]`
#[derive(Debug, Clone, Default)]
pub struct RouteListCommand {
    pub method: Option<String>,
    pub name: Option<String>,
}

const HEADERS: [&str; 5] = ["Method", "URI", "Name", "Action", "Middleware"];

/// Render the routes as a table of Method | URI | Name | Action | Middleware.
///
/// `method` matches case-insensitively; `name` matches as a substring.
pub fn route_table(routes: &RouteCollection, method: Option<&str>, name: Option<&str>) -> String {
    if routes.is_empty() {
        return "No routes registered.".to_string();
    }

    let rows: Vec<[String; 5]> = routes
        .get_routes()
        .iter()
        .filter(|route| method.is_none_or(|m| route.methods().iter().any(|rm| rm.as_str().eq_ignore_ascii_case(m))))
        .filter(|route| name.is_none_or(|n| route.get_name().is_some_and(|rn| rn.contains(n))))
        .map(|route| {
            let methods: Vec<&str> = route.methods().iter().map(|m| m.as_str()).collect();
            let mut middleware = vec![route.get_blueprint().to_string()];
            middleware.extend(route.get_middleware().iter().cloned());
            [
                methods.join("|"),
                route.uri().to_string(),
                route.get_name().unwrap_or_default().to_string(),
                route.action_name(),
                middleware.join(", "),
            ]
        })
        .collect();

    if rows.is_empty() {
        return "No routes match the given filters.".to_string();
    }

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: &[&str]| {
        cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut table = vec![
        line(&HEADERS),
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-"),
    ];
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        table.push(line(&cells));
    }
    table.join("\n")
}

#[async_trait]
impl Command for RouteListCommand {
    fn name(&self) -> &str {
        "route:list"
    }

    fn description(&self) -> &str {
        "List all registered routes"
    }

    async fn run(&self, app: &mut Application, out: Output<'_>) -> anyhow::Result<()> {
        app.boot().await?;
        let table = route_table(app.routes(), self.method.as_deref(), self.name.as_deref());
        writeln!(out, "{table}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::Router;
    use crate::test_utils::test_application;
    use tempfile::TempDir;

    fn router() -> Router {
        let mut router = Router::new();
        router.get("/", || async { "home" }).name("home");
        router.post("/posts", || async { "" }).name("posts.store").middleware(["auth"]);
        router
    }

    #[test]
    fn test_table_layout() {
        let mut router = router();
        let table = route_table(router.routes(), None, None);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "Method   | URI    | Name        | Action  | Middleware");
        assert!(lines[1].starts_with("---------+-"));
        assert_eq!(lines[2], "GET|HEAD | /      | home        | closure | web");
        assert_eq!(lines[3], "POST     | /posts | posts.store | closure | web, auth");
    }

    #[test]
    fn test_filters() {
        let mut router = router();
        let table = route_table(router.routes(), Some("post"), None);
        assert_eq!(table.lines().count(), 3);
        assert!(table.contains("posts.store"));

        let table = route_table(router.routes(), None, Some("home"));
        assert!(table.contains("| home "));
        assert!(!table.contains("posts"));

        assert_eq!(
            route_table(router.routes(), Some("DELETE"), None),
            "No routes match the given filters."
        );
        assert_eq!(route_table(Router::new().routes(), None, None), "No routes registered.");
    }

    #[tokio::test]
    async fn test_command_lists_provider_routes() {
        let dir = TempDir::new().unwrap();
        let mut app = test_application(&dir).await;
        let mut out = Vec::<u8>::new();
        RouteListCommand {
            method: None,
            name: Some("auth.".into()),
        }
        .run(&mut app, &mut out)
        .await
        .unwrap();

        let output = String::from_utf8(out).unwrap();
        assert!(output.contains("/api/auth/login"));
        assert!(output.contains("api, auth"));
    }
}
