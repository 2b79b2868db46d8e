use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::Local;
use tracing::{info, warn};

use super::error::BatchError;
use super::resolve::product_fragment;
use super::types::WorkItem;

const URL_ALIASES: [&str; 1] = ["url"];
const PRODUCT_ALIASES: [&str; 5] = [
    "product_no",
    "productno",
    "product_id",
    "product",
    "sku",
];
const NAME_ALIASES: [&str; 3] = ["name", "product_id", "title"];

fn header_index(headers: &csv::StringRecord) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for (idx, header) in headers.iter().enumerate() {
        index.insert(header.trim().to_ascii_lowercase(), idx);
    }
    index
}

fn find_column(index: &HashMap<String, usize>, aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| index.get(&alias.to_ascii_lowercase()).copied())
}

/// Reads URL work items. The `url` column is required (case-insensitive);
/// blank rows are skipped with a warning. The display name falls back to
/// `<prefix>-<row_index>` when no name column exists or the value is blank.
pub fn read_url_items(path: &Path, name_prefix: &str) -> Result<Vec<WorkItem>, BatchError> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|err| BatchError::Input(format!("cannot read {}: {err}", path.display())))?;
    let headers = reader
        .headers()
        .map_err(|err| BatchError::Input(format!("missing CSV header row: {err}")))?
        .clone();
    let index = header_index(&headers);

    let Some(url_col) = find_column(&index, &URL_ALIASES) else {
        return Err(BatchError::Input(format!(
            "CSV must contain a 'url' column, found: {}",
            headers.iter().collect::<Vec<_>>().join(", ")
        )));
    };
    let name_col = find_column(&index, &NAME_ALIASES);
    info!(
        url_column = headers.get(url_col).unwrap_or(""),
        name_column = name_col.and_then(|c| headers.get(c)).unwrap_or("(generated)"),
        "resolved CSV columns"
    );

    let mut items = Vec::new();
    for (row_idx, record) in reader.records().enumerate() {
        let row_idx = row_idx + 1;
        let record = record
            .map_err(|err| BatchError::Input(format!("CSV row {row_idx} unreadable: {err}")))?;
        let url = record.get(url_col).unwrap_or("").trim();
        if url.is_empty() {
            warn!(row = row_idx, "blank URL, row skipped");
            continue;
        }
        let name = name_col
            .and_then(|c| record.get(c))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{name_prefix}-{row_idx}"));
        items.push(WorkItem {
            sequence_index: row_idx,
            identifier: url.to_string(),
            target_url_fragment: url.to_string(),
            display_name: name,
        });
    }
    Ok(items)
}

/// Reads product work items for harvest mode. A `product_no` column (or one
/// of its aliases) is required; the target fragment is the canonical product
/// page path.
pub fn read_product_items(path: &Path) -> Result<Vec<WorkItem>, BatchError> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|err| BatchError::Input(format!("cannot read {}: {err}", path.display())))?;
    let headers = reader
        .headers()
        .map_err(|err| BatchError::Input(format!("missing CSV header row: {err}")))?
        .clone();
    let index = header_index(&headers);

    let Some(product_col) = find_column(&index, &PRODUCT_ALIASES) else {
        return Err(BatchError::Input(format!(
            "CSV must contain a 'product_no' column, found: {}",
            headers.iter().collect::<Vec<_>>().join(", ")
        )));
    };
    info!(
        product_column = headers.get(product_col).unwrap_or(""),
        "resolved CSV columns"
    );

    let mut items = Vec::new();
    for (row_idx, record) in reader.records().enumerate() {
        let row_idx = row_idx + 1;
        let record = record
            .map_err(|err| BatchError::Input(format!("CSV row {row_idx} unreadable: {err}")))?;
        let product_no = record.get(product_col).unwrap_or("").trim();
        if product_no.is_empty() {
            warn!(row = row_idx, "blank product number, row skipped");
            continue;
        }
        items.push(WorkItem {
            sequence_index: row_idx,
            identifier: product_no.to_string(),
            target_url_fragment: product_fragment(product_no),
            display_name: product_no.to_string(),
        });
    }
    Ok(items)
}

/// Reduces a display name to a filesystem-safe base: spaces become
/// underscores, anything outside `[A-Za-z0-9._-]` is replaced, runs of
/// underscores collapse, and the result is capped at 120 characters.
pub fn sanitize_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return "NA".to_string();
    }
    let mut out = String::with_capacity(trimmed.len());
    let mut last_underscore = false;
    for ch in trimmed.chars() {
        let mapped = if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-') {
            ch
        } else {
            '_'
        };
        if mapped == '_' {
            if last_underscore {
                continue;
            }
            last_underscore = true;
        } else {
            last_underscore = false;
        }
        out.push(mapped);
    }
    out.truncate(120);
    if out.is_empty() {
        "NA".to_string()
    } else {
        out
    }
}

/// Picks a batch-unique filename for `base` + `ext`, appending `_2`, `_3`, …
/// until the name is unused. The chosen name is recorded in `used`.
pub fn unique_filename(base: &str, ext: &str, used: &mut HashSet<String>) -> String {
    let candidate = format!("{base}.{ext}");
    if used.insert(candidate.clone()) {
        return candidate;
    }
    let mut suffix = 2;
    loop {
        let candidate = format!("{base}_{suffix}.{ext}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        suffix += 1;
    }
}

pub fn default_log_path(command: &str) -> String {
    let ts = Local::now().format("%Y%m%d_%H%M%S");
    format!("./logs/{command}_{ts}.log")
}

pub fn default_report_path(command: &str) -> String {
    format!("./{command}_result.html")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn csv_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp csv");
        file.write_all(content.as_bytes()).expect("write csv");
        file
    }

    #[test]
    fn url_items_match_non_blank_rows() {
        let file = csv_file("URL,Name\n/p/1,first\n,skipped\n/p/2,\nhttp://x.test/y,third\n");
        let items = read_url_items(file.path(), "url").expect("items");
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].sequence_index, 1);
        assert_eq!(items[0].display_name, "first");
        // blank name falls back to the generated prefix with the 1-based row
        assert_eq!(items[1].sequence_index, 3);
        assert_eq!(items[1].display_name, "url-3");
        assert_eq!(items[2].target_url_fragment, "http://x.test/y");
    }

    #[test]
    fn column_matching_is_case_insensitive() {
        let file = csv_file("uRl,TITLE\n/a,Page A\n");
        let items = read_url_items(file.path(), "url").expect("items");
        assert_eq!(items[0].display_name, "Page A");
    }

    #[test]
    fn missing_url_column_is_fatal() {
        let file = csv_file("link,name\n/a,x\n");
        let err = read_url_items(file.path(), "url").expect_err("must fail");
        assert!(matches!(err, BatchError::Input(_)));
    }

    #[test]
    fn product_items_build_product_fragments() {
        let file = csv_file("PRODUCT_NO\nPD1\n\nPD2\n");
        let items = read_product_items(file.path()).expect("items");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].target_url_fragment, "/+,PD1");
        assert_eq!(items[1].sequence_index, 3);
    }

    #[test]
    fn sanitize_name_rules() {
        assert_eq!(sanitize_name("My Product (large)"), "My_Product_large_");
        assert_eq!(sanitize_name("  "), "NA");
        assert_eq!(sanitize_name("a__b   c"), "a_b_c");
        assert_eq!(sanitize_name("safe-name.v2"), "safe-name.v2");
    }

    #[test]
    fn filename_collisions_get_numeric_suffixes() {
        let mut used = HashSet::new();
        assert_eq!(unique_filename("A", "jpg", &mut used), "A.jpg");
        assert_eq!(unique_filename("A", "jpg", &mut used), "A_2.jpg");
        assert_eq!(unique_filename("A", "jpg", &mut used), "A_3.jpg");
        assert_eq!(unique_filename("B", "jpg", &mut used), "B.jpg");
    }
}
