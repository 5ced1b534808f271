use std::fmt;

use sks_common::{Result, SksError};

/// One element of a [`QueryTemplate`]: literal SQL text or a typed hole
/// substituted per (chunk, subchunk) at generation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateEntry {
    /// Literal SQL text.
    Literal(String),
    /// Chunk number.
    Chunk,
    /// Subchunk number.
    SubChunk,
    /// Overlap table of `table`, rendered as
    /// `<table>FullOverlap_<chunk>[_<subchunk>]`.
    Overlap {
        /// Base table whose overlap rows are addressed.
        table: String,
    },
    /// Database name of the dominant partitioning.
    Db,
}

/// A rendered statement with typed holes.
///
/// `Display` shows holes as `%CC%` / `%SS%` / `%OV:<table>%` / `%DB%`
/// markers, so a hole-free template displays as exact SQL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryTemplate {
    entries: Vec<TemplateEntry>,
}

impl QueryTemplate {
    /// Entries in order.
    pub fn entries(&self) -> &[TemplateEntry] {
        &self.entries
    }

    /// Returns whether any non-literal hole is present.
    pub fn has_holes(&self) -> bool {
        self.entries
            .iter()
            .any(|e| !matches!(e, TemplateEntry::Literal(_)))
    }

    /// Returns whether a subchunk hole is present. Overlap holes alone do
    /// not require subchunks; at chunk level they address the whole chunk's
    /// overlap table.
    pub fn has_subchunk_holes(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e, TemplateEntry::SubChunk))
    }

    /// Substitute holes for one (chunk, subchunk) combination.
    ///
    /// A subchunk-level hole with no subchunk supplied is an analysis-stage
    /// contract violation and yields an error.
    pub fn render(&self, db: &str, chunk: i32, subchunk: Option<i32>) -> Result<String> {
        let mut out = String::new();
        for entry in &self.entries {
            match entry {
                TemplateEntry::Literal(s) => out.push_str(s),
                TemplateEntry::Chunk => out.push_str(&chunk.to_string()),
                TemplateEntry::SubChunk => match subchunk {
                    Some(s) => out.push_str(&s.to_string()),
                    None => {
                        return Err(SksError::Analysis(
                            "template has a subchunk hole but no subchunk was supplied".into(),
                        ));
                    }
                },
                TemplateEntry::Overlap { table } => {
                    out.push_str(table);
                    out.push_str("FullOverlap_");
                    out.push_str(&chunk.to_string());
                    if let Some(s) = subchunk {
                        out.push('_');
                        out.push_str(&s.to_string());
                    }
                }
                TemplateEntry::Db => out.push_str(db),
            }
        }
        Ok(out)
    }
}

impl fmt::Display for QueryTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            match entry {
                TemplateEntry::Literal(s) => write!(f, "{s}")?,
                TemplateEntry::Chunk => write!(f, "%CC%")?,
                TemplateEntry::SubChunk => write!(f, "%SS%")?,
                TemplateEntry::Overlap { table } => write!(f, "%OV:{table}%")?,
                TemplateEntry::Db => write!(f, "%DB%")?,
            }
        }
        Ok(())
    }
}

/// Accumulates literal text and holes while a statement renders itself.
/// Adjacent literal pushes merge into one entry.
#[derive(Debug, Default)]
pub struct SqlWriter {
    entries: Vec<TemplateEntry>,
}

impl SqlWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append literal SQL text.
    pub fn push_str(&mut self, s: &str) {
        if s.is_empty() {
            return;
        }
        if let Some(TemplateEntry::Literal(last)) = self.entries.last_mut() {
            last.push_str(s);
        } else {
            self.entries.push(TemplateEntry::Literal(s.to_string()));
        }
    }

    /// Append one hole (or pre-built entry).
    pub fn push_entry(&mut self, entry: TemplateEntry) {
        match entry {
            TemplateEntry::Literal(s) => self.push_str(&s),
            other => self.entries.push(other),
        }
    }

    /// Append a table name that may carry substitution markers (`%CC%`,
    /// `%SS%`, `%DB%`, `%OV:<table>%`), splitting it into literal text and
    /// typed holes. Chunk rewriting installs such names in parallel
    /// statements; an unmarked name passes through as a literal.
    pub fn push_marked(&mut self, name: &str) {
        let mut rest = name;
        while let Some(start) = rest.find('%') {
            self.push_str(&rest[..start]);
            let tail = &rest[start..];
            if let Some(stripped) = tail.strip_prefix("%CC%") {
                self.push_entry(TemplateEntry::Chunk);
                rest = stripped;
            } else if let Some(stripped) = tail.strip_prefix("%SS%") {
                self.push_entry(TemplateEntry::SubChunk);
                rest = stripped;
            } else if let Some(stripped) = tail.strip_prefix("%DB%") {
                self.push_entry(TemplateEntry::Db);
                rest = stripped;
            } else if let Some(after) = tail.strip_prefix("%OV:") {
                match after.find('%') {
                    Some(end) => {
                        self.push_entry(TemplateEntry::Overlap {
                            table: after[..end].to_string(),
                        });
                        rest = &after[end + 1..];
                    }
                    None => {
                        // Unterminated marker: keep the text as-is.
                        self.push_str(tail);
                        return;
                    }
                }
            } else {
                self.push_str("%");
                rest = &tail[1..];
            }
        }
        self.push_str(rest);
    }

    /// Finish into a template.
    pub fn finish(self) -> QueryTemplate {
        QueryTemplate {
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunked_object() -> QueryTemplate {
        let mut w = SqlWriter::new();
        w.push_str("SELECT ra, decl FROM ");
        w.push_str("Object_");
        w.push_entry(TemplateEntry::Chunk);
        w.finish()
    }

    #[test]
    fn adjacent_literals_merge() {
        let t = chunked_object();
        assert_eq!(t.entries().len(), 2);
        assert_eq!(t.to_string(), "SELECT ra, decl FROM Object_%CC%");
    }

    #[test]
    fn renders_chunk_and_subchunk() {
        let t = chunked_object();
        assert_eq!(
            t.render("LSST", 1234, None).unwrap(),
            "SELECT ra, decl FROM Object_1234"
        );

        let mut w = SqlWriter::new();
        w.push_str("SELECT * FROM ");
        w.push_entry(TemplateEntry::Overlap {
            table: "Object".into(),
        });
        let t = w.finish();
        assert_eq!(
            t.render("LSST", 12, Some(3)).unwrap(),
            "SELECT * FROM ObjectFullOverlap_12_3"
        );
        assert!(t.has_subchunk_holes());
    }

    #[test]
    fn marked_names_split_into_holes() {
        let mut w = SqlWriter::new();
        w.push_str("SELECT * FROM ");
        w.push_marked("Object_%CC%_%SS%");
        let t = w.finish();
        assert_eq!(t.to_string(), "SELECT * FROM Object_%CC%_%SS%");
        assert_eq!(
            t.render("LSST", 7, Some(2)).unwrap(),
            "SELECT * FROM Object_7_2"
        );

        let mut w = SqlWriter::new();
        w.push_marked("%OV:Object%");
        let t = w.finish();
        assert_eq!(t.render("LSST", 7, None).unwrap(), "ObjectFullOverlap_7");
        assert!(!t.has_subchunk_holes());

        let mut w = SqlWriter::new();
        w.push_marked("Plain");
        assert_eq!(w.finish().to_string(), "Plain");
    }

    #[test]
    fn subchunk_hole_requires_subchunk() {
        let mut w = SqlWriter::new();
        w.push_str("Object_");
        w.push_entry(TemplateEntry::Chunk);
        w.push_str("_");
        w.push_entry(TemplateEntry::SubChunk);
        let t = w.finish();
        assert!(t.render("LSST", 1, None).is_err());
        assert_eq!(t.render("LSST", 1, Some(2)).unwrap(), "Object_1_2");
    }
}
