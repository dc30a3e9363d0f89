use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use splat_table::DataTable;

use crate::sog::{SogOptions, write_sog_bundle};
use crate::{CodecError, NamedFile};

/// Viewer template bytes; treated as opaque assets.
const TEMPLATE_HTML: &str = include_str!("../assets/viewer/index.html");
const TEMPLATE_CSS: &str = include_str!("../assets/viewer/index.css");
const TEMPLATE_JS: &str = include_str!("../assets/viewer/index.js");

pub struct HtmlOptions {
    /// Emit index.html/index.css/index.js/scene.sog as separate files
    /// instead of one self-contained page.
    pub unbundled: bool,
    /// Output base name; the unbundled scene bundle becomes `<base>.sog`.
    pub base_name: String,
    /// Settings JSON inlined for the viewer runtime.
    pub viewer_settings: Option<serde_json::Value>,
    pub sog: SogOptions,
}

impl Default for HtmlOptions {
    fn default() -> Self {
        Self {
            unbundled: false,
            base_name: "scene".to_owned(),
            viewer_settings: None,
            sog: SogOptions::default(),
        }
    }
}

fn settings_json(options: &HtmlOptions) -> Result<String, CodecError> {
    Ok(match &options.viewer_settings {
        Some(value) => serde_json::to_string(value)?,
        None => "{}".to_owned(),
    })
}

/// Writes the HTML viewer around a SOG bundle of the scene.
///
/// Bundled output is a single `index.html` with the styles, the runtime and
/// the base64 scene inlined. Unbundled output keeps the four files separate.
pub fn write_html(table: &DataTable, options: &HtmlOptions) -> Result<Vec<NamedFile>, CodecError> {
    let scene = write_sog_bundle(table, &options.sog)?;
    let settings = settings_json(options)?;

    if options.unbundled {
        let html = TEMPLATE_HTML
            .replace(
                "<!-- __CSS__ -->",
                "<link rel=\"stylesheet\" href=\"index.css\">",
            )
            .replace(
                "<!-- __JS__ -->",
                &format!(
                    "<script src=\"index.js\" data-scene=\"{}.sog\"></script>",
                    options.base_name
                ),
            )
            .replace("/* __SETTINGS__ */ {}", &settings);

        return Ok(vec![
            NamedFile::new("index.html", html.into_bytes()),
            NamedFile::new("index.css", TEMPLATE_CSS.as_bytes().to_vec()),
            NamedFile::new("index.js", TEMPLATE_JS.as_bytes().to_vec()),
            NamedFile::new(format!("{}.sog", options.base_name), scene),
        ]);
    }

    let html = TEMPLATE_HTML
        .replace(
            "<!-- __CSS__ -->",
            &format!("<style>\n{TEMPLATE_CSS}</style>"),
        )
        .replace(
            "<!-- __JS__ -->",
            &format!("<script>\n{TEMPLATE_JS}</script>"),
        )
        .replace("/* __SETTINGS__ */ {}", &settings)
        .replace(
            "/* __SCENE__ */ null",
            &format!("\"{}\"", BASE64.encode(&scene)),
        );

    Ok(vec![NamedFile::new("index.html", html.into_bytes())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::test_grid;

    #[test]
    fn bundled_is_self_contained() {
        let table = test_grid();
        let files = write_html(&table, &HtmlOptions::default()).unwrap();
        assert_eq!(files.len(), 1);

        let html = String::from_utf8(files[0].bytes.clone()).unwrap();
        assert!(html.contains("<style>"));
        assert!(html.contains("window.sceneSource"));
        // The zip magic, base64 encoded, leads the inlined scene.
        assert!(html.contains("\"UEsDB"));
    }

    #[test]
    fn unbundled_emits_four_files() {
        let table = test_grid();
        let options = HtmlOptions {
            unbundled: true,
            base_name: "garden".to_owned(),
            ..Default::default()
        };
        let files = write_html(&table, &options).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["index.html", "index.css", "index.js", "garden.sog"]);

        let html = String::from_utf8(files[0].bytes.clone()).unwrap();
        assert!(html.contains("href=\"index.css\""));
        assert!(html.contains("data-scene=\"garden.sog\""));
    }

    #[test]
    fn settings_are_inlined() {
        let table = test_grid();
        let options = HtmlOptions {
            viewer_settings: Some(serde_json::json!({"camera": {"fov": 60}})),
            ..Default::default()
        };
        let files = write_html(&table, &options).unwrap();
        let html = String::from_utf8(files[0].bytes.clone()).unwrap();
        assert!(html.contains("\"fov\":60"));
    }
}
