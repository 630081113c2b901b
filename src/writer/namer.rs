//! Deterministic output file naming
//!
//! File names come from four named sub-templates (schema, table, view, data)
//! rendered against the namer's fields: database, table and a positional
//! index. The index shape is a load-bearing contract, since downstream
//! tooling that globs or reassembles exported files depends on it. It is
//! fixed at namer construction from the two limit switches in configuration.

use crate::config::TemplateConfig;
use crate::error::{ConfigError, Result};
use crate::task::TableMetaInfo;

/// Field placeholders accepted inside a sub-template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Db,
    Table,
    Index,
}

/// One parsed sub-template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubTemplate {
    segments: Vec<Segment>,
}

impl SubTemplate {
    fn parse(raw: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = raw;
        while let Some(open) = rest.find('{') {
            if !rest[..open].is_empty() {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| {
                ConfigError::InvalidTemplate(format!("unclosed placeholder in '{raw}'"))
            })?;
            let field = &after[..close];
            segments.push(match field {
                "db" => Segment::Db,
                "table" => Segment::Table,
                "index" => Segment::Index,
                other => {
                    return Err(ConfigError::InvalidTemplate(format!(
                        "unknown placeholder '{{{other}}}' in '{raw}'"
                    ))
                    .into())
                }
            });
            rest = &after[close + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        Ok(Self { segments })
    }

    fn render(&self, db: &str, table: &str, index: &str) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Db => out.push_str(db),
                Segment::Table => out.push_str(table),
                Segment::Index => out.push_str(index),
            }
        }
        out
    }
}

/// Which sub-template to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubTemplateName {
    Schema,
    Table,
    View,
    Data,
}

/// The four parsed filename sub-templates, shared by all namers of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNameTemplate {
    schema: SubTemplate,
    table: SubTemplate,
    view: SubTemplate,
    data: SubTemplate,
}

impl FileNameTemplate {
    /// Parse every sub-template; any bad placeholder is a configuration
    /// error surfaced before the run starts.
    pub fn parse(config: &TemplateConfig) -> Result<Self> {
        Ok(Self {
            schema: SubTemplate::parse(&config.schema)?,
            table: SubTemplate::parse(&config.table)?,
            view: SubTemplate::parse(&config.view)?,
            data: SubTemplate::parse(&config.data)?,
        })
    }

    fn sub(&self, name: SubTemplateName) -> &SubTemplate {
        match name {
            SubTemplateName::Schema => &self.schema,
            SubTemplateName::Table => &self.table,
            SubTemplateName::View => &self.view,
            SubTemplateName::Data => &self.data,
        }
    }
}

/// Shape of the positional index inside data file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexStyle {
    /// 9-digit chunk index then 4-digit file index (rows + size limits)
    ChunkAndFile,

    /// 9-digit file index (size limit only)
    FileOnly,

    /// 9-digit chunk index (rows limit only, or neither)
    ChunkOnly,
}

/// Stateful name generator scoped to one table-data chunk.
///
/// The file index advances each time a new physical file is started; the
/// chunk index and the index style never change during the namer's lifetime.
#[derive(Debug, Clone)]
pub struct OutputFileNamer {
    db: String,
    table: String,
    chunk_index: usize,
    file_index: usize,
    style: IndexStyle,
}

impl OutputFileNamer {
    /// Namer for one data chunk. The style is computed once from which of
    /// the row-count and file-size limits are active.
    pub fn new(meta: &TableMetaInfo, chunk_index: usize, rows: bool, file_size: bool) -> Self {
        let style = if rows && file_size {
            IndexStyle::ChunkAndFile
        } else if file_size {
            IndexStyle::FileOnly
        } else {
            IndexStyle::ChunkOnly
        };
        Self {
            db: meta.database.clone(),
            table: meta.table.clone(),
            chunk_index,
            file_index: 0,
            style,
        }
    }

    /// Namer for meta files, which render no positional index in practice.
    pub fn for_meta(db: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            table: table.into(),
            chunk_index: 0,
            file_index: 0,
            style: IndexStyle::ChunkOnly,
        }
    }

    /// Current index rendered per the fixed style.
    pub fn index(&self) -> String {
        match self.style {
            IndexStyle::ChunkAndFile => format!("{:09}{:04}", self.chunk_index, self.file_index),
            IndexStyle::FileOnly => format!("{:09}", self.file_index),
            IndexStyle::ChunkOnly => format!("{:09}", self.chunk_index),
        }
    }

    /// Render one sub-template against the namer's current fields.
    pub fn render(&self, template: &FileNameTemplate, name: SubTemplateName) -> String {
        template.sub(name).render(&self.db, &self.table, &self.index())
    }

    /// Render the data sub-template with the extension appended, then
    /// advance the file index: two calls yield two different names.
    pub fn next_name(&mut self, template: &FileNameTemplate, extension: &str) -> String {
        let base = self.render(template, SubTemplateName::Data);
        self.file_index += 1;
        format!("{base}.{extension}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TemplateConfig;

    fn template() -> FileNameTemplate {
        FileNameTemplate::parse(&TemplateConfig::default()).unwrap()
    }

    fn meta() -> TableMetaInfo {
        TableMetaInfo::new("db1", "t1")
    }

    #[test]
    fn test_index_style_both_limits() {
        let namer = OutputFileNamer::new(&meta(), 3, true, true);
        assert_eq!(namer.index(), "0000000030000");
    }

    #[test]
    fn test_index_style_size_only_uses_file_index() {
        let mut namer = OutputFileNamer::new(&meta(), 3, false, true);
        assert_eq!(namer.next_name(&template(), "sql"), "db1.t1.000000000.sql");
        assert_eq!(namer.next_name(&template(), "sql"), "db1.t1.000000001.sql");
        // The chunk index never leaks into the name.
        assert_eq!(namer.next_name(&template(), "sql"), "db1.t1.000000002.sql");
    }

    #[test]
    fn test_index_style_rows_only_uses_chunk_index() {
        let mut namer = OutputFileNamer::new(&meta(), 7, true, false);
        assert_eq!(namer.next_name(&template(), "sql"), "db1.t1.000000007.sql");
        // Without a size limit the file index is not part of the contract.
        assert_eq!(namer.next_name(&template(), "sql"), "db1.t1.000000007.sql");
    }

    #[test]
    fn test_index_style_neither_limit_degenerates_to_chunk() {
        let namer = OutputFileNamer::new(&meta(), 4, false, false);
        assert_eq!(namer.index(), "000000004");
    }

    #[test]
    fn test_next_name_advances_only_file_index() {
        let mut namer = OutputFileNamer::new(&meta(), 2, true, true);
        let names: Vec<String> = (0..3).map(|_| namer.next_name(&template(), "sql")).collect();
        assert_eq!(names[0], "db1.t1.0000000020000.sql");
        assert_eq!(names[1], "db1.t1.0000000020001.sql");
        assert_eq!(names[2], "db1.t1.0000000020002.sql");
    }

    #[test]
    fn test_render_meta_subtemplates() {
        let namer = OutputFileNamer::for_meta("db1", "v1");
        assert_eq!(
            namer.render(&template(), SubTemplateName::Schema),
            "db1-schema-create"
        );
        assert_eq!(
            namer.render(&template(), SubTemplateName::Table),
            "db1.v1-schema"
        );
        assert_eq!(
            namer.render(&template(), SubTemplateName::View),
            "db1.v1-schema-view"
        );
    }

    #[test]
    fn test_parse_rejects_unknown_placeholder() {
        let mut config = TemplateConfig::default();
        config.data = "{db}.{chunk}".to_string();
        assert!(FileNameTemplate::parse(&config).is_err());
    }

    #[test]
    fn test_parse_rejects_unclosed_placeholder() {
        let mut config = TemplateConfig::default();
        config.schema = "{db-schema".to_string();
        assert!(FileNameTemplate::parse(&config).is_err());
    }
}
