//! Renders the listing page from `templates/index.html`.
//!
//! The template is compiled once at startup. Every interpolated value goes
//! through an HTML-escaping default formatter; download links use the
//! `urlencode` formatter instead.

use crate::models::stored_file::StoredFile;
use thiserror::Error;
use upon::{Engine, Template};

const INDEX_TEMPLATE: &str = include_str!("../../templates/index.html");
const PAGE_TITLE: &str = "File Manager";

#[derive(Debug, Error)]
#[error("template error: {0}")]
pub struct RenderError(#[from] upon::Error);

pub struct PageRenderer {
    engine: Engine<'static>,
    template: Template<'static>,
}

impl PageRenderer {
    /// Compile the built-in index template.
    pub fn new() -> Result<Self, RenderError> {
        Self::from_source(INDEX_TEMPLATE)
    }

    fn from_source(source: &'static str) -> Result<Self, RenderError> {
        let mut engine = Engine::new();
        addons::configure(&mut engine);
        let template = engine.compile(source)?;
        Ok(Self { engine, template })
    }

    /// Render the listing page.
    pub fn render_index(&self, files: &[StoredFile]) -> Result<String, RenderError> {
        let entries: Vec<upon::Value> = files
            .iter()
            .map(|file| {
                upon::value! {
                    key: &file.key,
                    filename: &file.filename,
                    size: file.size,
                    uploaded: file
                        .upload_date
                        .map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string()),
                }
            })
            .collect();
        let page = self
            .template
            .render(
                &self.engine,
                upon::value! {
                    title: PAGE_TITLE,
                    count: files.len() as u64,
                    empty: files.is_empty(),
                    files: entries,
                },
            )
            .to_string()?;
        Ok(page)
    }
}

mod addons {
    use std::fmt::Write;
    use upon::{Engine, Value, fmt as upon_fmt};

    /// Default formatter: strings are HTML-escaped, everything else is
    /// formatted as upon normally would.
    fn escape_html(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
        match value {
            Value::String(s) => {
                for c in s.chars() {
                    match c {
                        '&' => f.write_str("&amp;")?,
                        '<' => f.write_str("&lt;")?,
                        '>' => f.write_str("&gt;")?,
                        '"' => f.write_str("&quot;")?,
                        '\'' => f.write_str("&#x27;")?,
                        c => f.write_char(c)?,
                    }
                }
            }
            v => upon_fmt::default(f, v)?,
        };
        Ok(())
    }

    /// Percent-encode a string for use inside a query parameter.
    fn urlencode(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
        match value {
            Value::String(s) => write!(f, "{}", urlencoding::encode(s))?,
            v => upon_fmt::default(f, v)?,
        };
        Ok(())
    }

    pub(super) fn configure(engine: &mut Engine<'_>) {
        engine.set_default_formatter(&escape_html);
        engine.add_formatter("urlencode", urlencode);
    }
}
