//! Evaluator matrix artifact assembly.
//!
//! Layout, one item per line:
//!
//! ```text
//! <header block, verbatim>
//! <tag name padded to width> <tag 1> <tag 2> ...
//! <target name padded>       <target 1> ...
//! <descriptor name padded>   <value 1> ...      (one line per descriptor)
//! <trailer block, verbatim>
//! ```

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::schema::{ArtifactConfig, DEFAULT_TAG_WIDTH, Dataset, DescriptorSubset};

/// A rendered evaluator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixArtifact {
    text: String,
    body: Range<usize>,
}

impl MatrixArtifact {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    /// Row values of a column line, looked up by column name.
    ///
    /// Only the generated lines are searched, never the header or trailer.
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        self.text[self.body.clone()].lines().find_map(|line| {
            let mut tokens = line.split_whitespace();
            (tokens.next() == Some(name)).then(|| tokens.collect())
        })
    }
}

/// Renders subsets into evaluator artifacts with fixed boilerplate.
#[derive(Debug, Clone)]
pub struct ArtifactAssembler {
    header: Option<String>,
    trailer: Option<String>,
    tag_width: usize,
}

impl ArtifactAssembler {
    /// Create from in-memory blocks. Empty blocks count as absent.
    pub fn new(header: Option<String>, trailer: Option<String>) -> Self {
        let header = header.filter(|h| !h.is_empty());
        if header.is_none() {
            log::warn!("Matrix header is empty or missing; artifacts will have no header block");
        }
        Self {
            header,
            trailer: trailer.filter(|t| !t.is_empty()),
            tag_width: DEFAULT_TAG_WIDTH,
        }
    }

    /// Read both blocks from disk. Both files must exist.
    pub fn from_files(
        header_path: impl AsRef<Path>,
        trailer_path: impl AsRef<Path>,
    ) -> Result<Self, ArtifactError> {
        let header = read_block(header_path.as_ref())?;
        let trailer = read_block(trailer_path.as_ref())?;
        Ok(Self::new(Some(header), Some(trailer)))
    }

    /// Build from configuration.
    pub fn from_config(config: &ArtifactConfig) -> Result<Self, ArtifactError> {
        Ok(Self::from_files(&config.header_path, &config.trailer_path)?
            .with_tag_width(config.tag_width))
    }

    /// Set the minimum column-name width.
    pub fn with_tag_width(mut self, tag_width: usize) -> Self {
        self.tag_width = tag_width;
        self
    }

    pub fn tag_width(&self) -> usize {
        self.tag_width
    }

    /// Render one artifact.
    pub fn assemble(&self, dataset: &Dataset, subset: &DescriptorSubset) -> MatrixArtifact {
        render(
            dataset,
            subset,
            self.header.as_deref(),
            self.trailer.as_deref(),
            self.tag_width,
        )
    }
}

/// Render one artifact with the default tag width.
///
/// Warns when the header block is absent.
pub fn assemble(
    dataset: &Dataset,
    subset: &DescriptorSubset,
    header: Option<&str>,
    trailer: Option<&str>,
) -> MatrixArtifact {
    let header = header.filter(|h| !h.is_empty());
    if header.is_none() {
        log::warn!("Matrix header is empty or missing");
    }
    render(
        dataset,
        subset,
        header,
        trailer.filter(|t| !t.is_empty()),
        DEFAULT_TAG_WIDTH,
    )
}

fn render(
    dataset: &Dataset,
    subset: &DescriptorSubset,
    header: Option<&str>,
    trailer: Option<&str>,
    width: usize,
) -> MatrixArtifact {
    let mut text = String::new();
    if let Some(header) = header {
        text.push_str(header);
    }

    let start = text.len();
    push_line(&mut text, dataset.tag().name(), dataset.tag().raw(), width);
    push_line(
        &mut text,
        dataset.target().name(),
        dataset.target().raw(),
        width,
    );
    for name in subset.iter() {
        match dataset.descriptor(name) {
            Some(column) => push_line(&mut text, name, column.raw(), width),
            None => log::warn!("Descriptor '{name}' is not in the dataset; skipped"),
        }
    }
    let end = text.len();

    if let Some(trailer) = trailer {
        text.push_str(trailer);
    }

    MatrixArtifact {
        text,
        body: start..end,
    }
}

fn push_line(out: &mut String, name: &str, values: &[String], width: usize) {
    // Writing into a String cannot fail.
    let _ = write!(out, "{name:<width$}");
    for value in values {
        out.push(' ');
        out.push_str(value);
    }
    out.push('\n');
}

fn read_block(path: &Path) -> Result<String, ArtifactError> {
    if !path.is_file() {
        return Err(ArtifactError::Missing {
            path: path.to_path_buf(),
        });
    }
    fs::read_to_string(path).map_err(|source| ArtifactError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Boilerplate loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("{path:?} does not exist")]
    Missing { path: PathBuf },
    #[error("Cannot read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
