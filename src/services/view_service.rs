//! HTML views.
//!
//! Templates are minijinja based and live as stand-alone files under
//! `templates/`, included here at compile time. Names end in `.html`, which
//! turns on HTML auto-escaping; fragments that are already HTML (previews)
//! go through the `safe` filter in the template.

use minijinja::Environment;
use serde::Serialize;

const LAYOUT_TEMPLATE: &str = include_str!("../../templates/layout.html");
const EDITOR_TEMPLATE: &str = include_str!("../../templates/editor.html");
const PREVIEW_TEMPLATE: &str = include_str!("../../templates/preview.html");
const CONTACT_TEMPLATE: &str = include_str!("../../templates/contact.html");
const ABOUT_TEMPLATE: &str = include_str!("../../templates/about.html");

pub const EDITOR_VIEW: &str = "editor.html";
pub const PREVIEW_VIEW: &str = "preview.html";
pub const CONTACT_VIEW: &str = "contact.html";
pub const ABOUT_VIEW: &str = "about.html";

pub struct Views {
    env: Environment<'static>,
}

impl Views {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template("layout.html", LAYOUT_TEMPLATE)?;
        env.add_template(EDITOR_VIEW, EDITOR_TEMPLATE)?;
        env.add_template(PREVIEW_VIEW, PREVIEW_TEMPLATE)?;
        env.add_template(CONTACT_VIEW, CONTACT_TEMPLATE)?;
        env.add_template(ABOUT_VIEW, ABOUT_TEMPLATE)?;
        Ok(Self { env })
    }

    /// Render view `name` with `context`.
    pub fn render<S: Serialize>(&self, name: &str, context: S) -> Result<String, minijinja::Error> {
        self.env.get_template(name)?.render(context)
    }
}
