//! CSV ingestion: format classification, row parsing, and merging of
//! horizontally-split exports.

pub mod format;
pub mod merge;
pub mod parse;
pub mod timestamp;

pub use format::TableFormat;
pub use merge::{MergeWarning, MergedTable, merge, merge_eligible};
pub use parse::{
    Cell, ParseError, ParsedRow, ParsedTable, RawPayload, RowIssue, parse, parse_with_progress,
};
