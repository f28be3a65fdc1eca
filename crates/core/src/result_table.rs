use serde_json::Value;

use crate::labels;

/// Rendered result set of one finished job, as shown in a tab's result panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultTable {
    titles: Vec<String>,
    rows: Vec<Vec<String>>,
    total: u64,
    download_url: Option<String>,
}

impl ResultTable {
    #[must_use]
    pub fn new(
        titles: Vec<String>,
        values: &[Vec<Value>],
        count: Option<u64>,
        download_url: Option<String>,
    ) -> Self {
        let rows = values
            .iter()
            .map(|row| row.iter().map(render_cell).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        let total = count.unwrap_or(rows.len() as u64);
        Self {
            titles,
            rows,
            total,
            download_url: download_url.filter(|url| is_downloadable(url)),
        }
    }

    #[must_use]
    pub fn titles(&self) -> &[String] {
        &self.titles
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    #[must_use]
    pub fn download_url(&self) -> Option<&str> {
        self.download_url.as_deref()
    }

    #[must_use]
    pub fn caption(&self) -> String {
        labels::record_count_caption(self.total)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn page_count(&self, page_size: usize) -> usize {
        if page_size == 0 || self.rows.is_empty() {
            return 1;
        }
        self.rows.len().div_ceil(page_size)
    }

    #[must_use]
    pub fn page(&self, page_index: usize, page_size: usize) -> &[Vec<String>] {
        let Some((start, end)) = self.page_bounds(page_index, page_size) else {
            return &[];
        };
        &self.rows[start..end]
    }

    /// One-based "{start} 到 {end}" label for a page, or the empty-result text.
    #[must_use]
    pub fn page_info(&self, page_index: usize, page_size: usize) -> String {
        match self.page_bounds(page_index, page_size) {
            Some((start, end)) => format!("{} 到 {}", start + 1, end),
            None => labels::NO_RECORDS.to_string(),
        }
    }

    fn page_bounds(&self, page_index: usize, page_size: usize) -> Option<(usize, usize)> {
        if page_size == 0 {
            return None;
        }
        let start = page_index.checked_mul(page_size)?;
        if start >= self.rows.len() {
            return None;
        }
        Some((start, (start + page_size).min(self.rows.len())))
    }
}

/// Servers send the literal string "null" when a job produced no file.
fn is_downloadable(url: &str) -> bool {
    let url = url.trim();
    !url.is_empty() && url != "null"
}

#[must_use]
pub fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{render_cell, ResultTable};

    fn numbered_table(rows: u64) -> ResultTable {
        let values = (1..=rows).map(|n| vec![json!(n)]).collect::<Vec<_>>();
        ResultTable::new(vec!["n".to_string()], &values, None, None)
    }

    #[test]
    fn single_row_result_has_record_caption() {
        let table = ResultTable::new(
            vec!["x".to_string()],
            &[vec![json!(1)]],
            Some(1),
            Some("/r/abc.csv".to_string()),
        );

        assert_eq!(table.caption(), "共 1 条记录");
        assert_eq!(table.rows(), &[vec!["1".to_string()]]);
        assert_eq!(table.download_url(), Some("/r/abc.csv"));
    }

    #[test]
    fn total_falls_back_to_row_count() {
        assert_eq!(numbered_table(3).total(), 3);
    }

    #[test]
    fn null_download_url_is_not_offered() {
        let table = ResultTable::new(Vec::new(), &[], None, Some("null".to_string()));
        assert_eq!(table.download_url(), None);
    }

    #[test]
    fn pages_cover_all_rows() {
        let table = numbered_table(45);
        assert_eq!(table.page_count(20), 3);
        assert_eq!(table.page(2, 20).len(), 5);
        assert_eq!(table.page(2, 20)[0], vec!["41".to_string()]);
        assert!(table.page(3, 20).is_empty());
        assert_eq!(table.page_info(1, 20), "21 到 40");
        assert_eq!(table.page_info(3, 20), "无记录");
    }

    #[test]
    fn cells_render_like_the_grid() {
        assert_eq!(render_cell(&json!(null)), "NULL");
        assert_eq!(render_cell(&json!("hehe")), "hehe");
        assert_eq!(render_cell(&json!(2.5)), "2.5");
        assert_eq!(render_cell(&json!(true)), "true");
        assert_eq!(render_cell(&json!([1, 2])), "[1,2]");
    }
}
