use crate::kernel::services::ports::file::file_name;

/// Text after the final `.` of the last path segment, or empty.
///
/// The tag keeps the file's own casing; [`LanguageFamily::from_tag`] folds it.
pub fn language_tag(path: &str) -> String {
    match file_name(path).rsplit_once('.') {
        Some((_, ext)) => ext.to_string(),
        None => String::new(),
    }
}

/// Highlighting family the editor surface loads for a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LanguageFamily {
    JavaScript,
    Python,
    Html,
    Css,
    Json,
    Markdown,
    Rust,
    Cpp,
    Java,
    Php,
}

impl LanguageFamily {
    /// Accepts either a file suffix or a language name. Unknown tags fall
    /// back to JavaScript.
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "javascript" | "js" | "jsx" | "mjs" | "cjs" | "typescript" | "ts" | "tsx" => {
                Self::JavaScript
            }
            "python" | "py" | "pyi" => Self::Python,
            "html" | "htm" => Self::Html,
            "css" | "scss" | "sass" => Self::Css,
            "json" => Self::Json,
            "markdown" | "md" => Self::Markdown,
            "rust" | "rs" => Self::Rust,
            "cpp" | "c++" | "c" | "h" | "hpp" | "cc" => Self::Cpp,
            "java" => Self::Java,
            "php" => Self::Php,
            _ => Self::JavaScript,
        }
    }

    pub fn from_path(path: &str) -> Self {
        Self::from_tag(&language_tag(path))
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::JavaScript => "JavaScript",
            Self::Python => "Python",
            Self::Html => "HTML",
            Self::Css => "CSS",
            Self::Json => "JSON",
            Self::Markdown => "Markdown",
            Self::Rust => "Rust",
            Self::Cpp => "C++",
            Self::Java => "Java",
            Self::Php => "PHP",
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/kernel/language.rs"]
mod tests;
