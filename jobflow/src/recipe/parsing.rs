//! Text collaborators: HTML cleaning, note parsing and ingredient parsing.
//!
//! The defaults are regex based. Production deployments can swap in richer
//! parsers through the traits.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::errors::{JobError, JobflowError, JobResult};

/// Turns imported HTML into plain text, one logical line per line.
pub trait HtmlCleaner: Send + Sync {
    /// Cleans the markup.
    fn clean(&self, html: &str) -> String;
}

/// Splits cleaned note text into its parts.
pub trait NoteParser: Send + Sync {
    /// Parses a note.
    fn parse(&self, text: &str) -> JobResult<ParsedNote>;
}

/// Parses a single ingredient line.
pub trait IngredientParser: Send + Sync {
    /// Parses the line.
    fn parse(&self, line: &str) -> JobResult<ParsedIngredient>;
}

/// Structured view of a note.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedNote {
    /// First non-empty line.
    pub title: String,
    /// Ingredient lines in order.
    pub ingredients: Vec<String>,
    /// Instruction steps in order.
    pub instructions: Vec<String>,
    /// Image references in order of appearance.
    pub images: Vec<String>,
}

impl ParsedNote {
    /// Number of follow-up jobs the note fans out into.
    pub fn followup_count(&self) -> usize {
        self.ingredients.len() + self.instructions.len() + self.images.len()
    }
}

/// A parsed ingredient line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedIngredient {
    /// Amount, if one was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    /// Unit as written, lowercased.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Everything after the amount and unit.
    pub name: String,
}

fn compile(pattern: &str) -> Result<Regex, JobflowError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| JobflowError::InvalidConfig(format!("invalid pattern {pattern:?}: {e}")))
}

/// Strips tags and decodes the common entities.
#[derive(Debug, Clone)]
pub struct RegexHtmlCleaner {
    breaks: Regex,
    tags: Regex,
}

impl RegexHtmlCleaner {
    /// Compiles the cleaner's patterns.
    pub fn new() -> Result<Self, JobflowError> {
        Ok(Self {
            breaks: compile(r"<br\s*/?>|</(?:p|div|li|h[1-6]|tr)>")?,
            tags: compile(r"<[^>]+>")?,
        })
    }
}

impl HtmlCleaner for RegexHtmlCleaner {
    fn clean(&self, html: &str) -> String {
        let text = self.breaks.replace_all(html, "\n");
        let text = self.tags.replace_all(&text, "");
        let text = text
            .replace("&nbsp;", " ")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&amp;", "&");

        text.lines()
            .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Ingredients,
    Instructions,
}

/// Line-oriented parser driven by section headings.
///
/// `Ingredients` starts the ingredient list; `Instructions`, `Directions`,
/// `Method` or `Steps` starts the step list. Markdown images and
/// `image: <ref>` lines are collected wherever they appear.
#[derive(Debug, Clone)]
pub struct SectionNoteParser {
    ingredients_heading: Regex,
    instructions_heading: Regex,
    markdown_image: Regex,
    image_line: Regex,
    bullet: Regex,
}

impl SectionNoteParser {
    /// Compiles the parser's patterns.
    pub fn new() -> Result<Self, JobflowError> {
        Ok(Self {
            ingredients_heading: compile(r"^ingredients?\s*:?$")?,
            instructions_heading: compile(r"^(?:instructions?|directions?|method|steps?)\s*:?$")?,
            markdown_image: compile(r"^!\[[^\]]*\]\(([^)\s]+)\)$")?,
            image_line: compile(r"^image:\s*(\S+)$")?,
            bullet: compile(r"^(?:[-*\u{2022}]\s+|\d+[.)]\s+)")?,
        })
    }

    fn image_ref<'t>(&self, line: &'t str) -> Option<&'t str> {
        self.markdown_image
            .captures(line)
            .or_else(|| self.image_line.captures(line))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

impl NoteParser for SectionNoteParser {
    fn parse(&self, text: &str) -> JobResult<ParsedNote> {
        let mut note = ParsedNote::default();
        let mut section = Section::Preamble;

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(image) = self.image_ref(line) {
                note.images.push(image.to_string());
                continue;
            }
            if self.ingredients_heading.is_match(line) {
                section = Section::Ingredients;
                continue;
            }
            if self.instructions_heading.is_match(line) {
                section = Section::Instructions;
                continue;
            }
            if note.title.is_empty() {
                note.title = line.to_string();
                continue;
            }
            let item = self.bullet.replace(line, "").trim().to_string();
            match section {
                Section::Ingredients if !item.is_empty() => note.ingredients.push(item),
                Section::Instructions if !item.is_empty() => note.instructions.push(item),
                _ => {}
            }
        }

        if note.title.is_empty() {
            return Err(JobError::parsing("Note has no title line"));
        }
        Ok(note)
    }
}

/// `quantity unit name` parser, e.g. `1 1/2 cups sugar` or `200g flour`.
#[derive(Debug, Clone)]
pub struct RegexIngredientParser {
    line: Regex,
}

impl RegexIngredientParser {
    /// Compiles the parser's pattern.
    pub fn new() -> Result<Self, JobflowError> {
        Ok(Self {
            line: compile(
                r"^(?:(?P<qty>\d+\s+\d+/\d+|\d+/\d+|\d+(?:[.,]\d+)?)\s*)?(?:(?P<unit>cups?|tablespoons?|tbsp|teaspoons?|tsp|grams?|g|kilograms?|kg|ml|l|ounces?|oz|pounds?|lbs?|pinch(?:es)?|cloves?)\.?\s+)?(?:of\s+)?(?P<name>.+)$",
            )?,
        })
    }
}

fn parse_quantity(raw: &str) -> Option<f64> {
    let raw = raw.replace(',', ".");
    raw.split_whitespace().try_fold(0.0, |total, part| {
        let value = match part.split_once('/') {
            Some((num, den)) => {
                let den: f64 = den.parse().ok()?;
                if den == 0.0 {
                    return None;
                }
                num.parse::<f64>().ok()? / den
            }
            None => part.parse::<f64>().ok()?,
        };
        Some(total + value)
    })
}

impl IngredientParser for RegexIngredientParser {
    fn parse(&self, line: &str) -> JobResult<ParsedIngredient> {
        let line = line.trim();
        let caps = self
            .line
            .captures(line)
            .ok_or_else(|| JobError::parsing(format!("Unrecognized ingredient line: {line:?}")))?;

        let name = caps.name("name").map_or("", |m| m.as_str().trim()).to_string();
        if name.is_empty() {
            return Err(JobError::parsing(format!("Ingredient line has no name: {line:?}")));
        }
        Ok(ParsedIngredient {
            quantity: caps.name("qty").and_then(|m| parse_quantity(m.as_str())),
            unit: caps.name("unit").map(|m| m.as_str().to_lowercase()),
            name,
        })
    }
}
