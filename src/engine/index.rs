use crate::domain::{row::INDENT_UNIT_PX, RawRow, Row, RowIndex};

/// Indexes raw rows in document order. Missing data defaults to an empty id/author and depth 0.
pub fn build_index(rows: &[RawRow]) -> RowIndex {
    RowIndex::new(
        rows.iter()
            .map(|raw| Row {
                id: raw.id.clone().unwrap_or_default(),
                author: raw
                    .author
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or_default()
                    .to_string(),
                indent_depth: raw.indent_width.unwrap_or(0) / INDENT_UNIT_PX,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_is_derived_from_indent_width() {
        let rows = vec![
            RawRow {
                id: Some("1".into()),
                author: Some(" pg ".into()),
                indent_width: Some(0),
            },
            RawRow {
                id: Some("2".into()),
                author: Some("dang".into()),
                indent_width: Some(80),
            },
            RawRow {
                id: Some("3".into()),
                author: None,
                indent_width: Some(119),
            },
            RawRow::default(),
        ];
        let index = build_index(&rows);
        let depths: Vec<u32> = index.rows().iter().map(|r| r.indent_depth).collect();
        assert_eq!(depths, vec![0, 2, 2, 0]);
        assert_eq!(index.rows()[0].author, "pg");
        assert_eq!(index.rows()[2].author, "");
        assert_eq!(index.rows()[3].id, "");
    }
}
