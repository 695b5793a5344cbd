//! Documentation UI pages
//!
//! Each renderer produces a minimal HTML page that loads its UI from a CDN
//! and points it at the served OpenAPI document.

/// Which documentation UI to serve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DocsRenderer {
    /// Stoplight Elements
    #[default]
    StoplightElements,
    SwaggerUi,
    Redoc,
    Scalar,
}

impl DocsRenderer {
    /// Generate the HTML page for this renderer
    pub fn render(self, title: &str, openapi_url: &str) -> String {
        let title = escape(title);
        let url = escape(openapi_url);
        match self {
            Self::StoplightElements => format!(
                r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1, shrink-to-fit=no">
    <title>{title}</title>
    <script src="https://unpkg.com/@stoplight/elements/web-components.min.js"></script>
    <link rel="stylesheet" href="https://unpkg.com/@stoplight/elements/styles.min.css">
  </head>
  <body>
    <elements-api apiDescriptionUrl="{url}" router="hash" layout="sidebar" tryItCredentialsPolicy="same-origin" />
  </body>
</html>"#
            ),
            Self::SwaggerUi => format!(
                r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
    <style>
      body {{ margin: 0; padding: 0; }}
      .swagger-ui .topbar {{ display: none; }}
    </style>
  </head>
  <body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-standalone-preset.js"></script>
    <script>
      window.onload = function() {{
        SwaggerUIBundle({{
          url: "{url}",
          dom_id: '#swagger-ui',
          deepLinking: true,
          presets: [
            SwaggerUIBundle.presets.apis,
            SwaggerUIStandalonePreset
          ],
          layout: "StandaloneLayout"
        }});
      }};
    </script>
  </body>
</html>"#
            ),
            Self::Redoc => format!(
                r#"<!DOCTYPE html>
<html>
  <head>
    <title>{title}</title>
    <meta charset="utf-8"/>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <style>body {{ margin: 0; padding: 0; }}</style>
  </head>
  <body>
    <redoc spec-url="{url}"></redoc>
    <script src="https://cdn.redoc.ly/redoc/latest/bundles/redoc.standalone.js"></script>
  </body>
</html>"#
            ),
            Self::Scalar => format!(
                r#"<!doctype html>
<html>
  <head>
    <title>{title}</title>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
  </head>
  <body>
    <script id="api-reference" data-url="{url}"></script>
    <script src="https://cdn.jsdelivr.net/npm/@scalar/api-reference"></script>
  </body>
</html>"#
            ),
        }
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_renderer_references_the_document() {
        for renderer in [
            DocsRenderer::StoplightElements,
            DocsRenderer::SwaggerUi,
            DocsRenderer::Redoc,
            DocsRenderer::Scalar,
        ] {
            let html = renderer.render("My API", "/openapi.yaml");
            assert!(html.contains("/openapi.yaml"), "{renderer:?}");
            assert!(html.contains("<title>My API</title>"), "{renderer:?}");
        }
    }

    #[test]
    fn default_is_stoplight() {
        let html = DocsRenderer::default().render("T", "/openapi.json");
        assert!(html.contains("<elements-api"));
    }

    #[test]
    fn titles_are_escaped() {
        let html = DocsRenderer::Redoc.render("<script>", "/o.json");
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<title><script>"));
    }
}
