// scorewatch/src/table.rs
//
// Delimited-text codec for the backing file.
//
// Read side:  header must carry every known column except `annotation`
//             (older exports predate the reviewer workflow). Unknown columns
//             are kept verbatim. A row whose score or truth cell does not
//             parse is skipped with a warning; a bad date only nulls `date`.
// Write side: header order is preserved, `annotation` is appended if the
//             source lacked it, dates are written back as their raw text.

use std::collections::HashMap;
use std::io::{Read, Write};

use tracing::warn;

use crate::error::{DashError, Result};
use crate::model::*;

/// Parsed table contents before they become a versioned snapshot.
#[derive(Debug)]
pub struct ParsedTable {
    pub columns: Vec<String>,
    pub records: Vec<Record>,
    pub skipped: usize,
}

struct ColumnMap {
    id:             usize,
    account:        usize,
    date:           usize,
    text:           usize,
    training_score: usize,
    prod_score:     usize,
    is_electronics: usize,
    annotation:     Option<usize>,
    extra:          Vec<usize>,
}

impl ColumnMap {
    fn from_header(header: &csv::StringRecord) -> Result<Self> {
        let index: HashMap<&str, usize> = header.iter()
            .enumerate()
            .map(|(i, name)| (name.trim(), i))
            .collect();
        let need = |name: &str| index.get(name).copied()
            .ok_or_else(|| DashError::MissingColumn(name.to_string()));

        Ok(Self {
            id:             need(COL_ID)?,
            account:        need(COL_ACCOUNT)?,
            date:           need(COL_DATE)?,
            text:           need(COL_TEXT)?,
            training_score: need(COL_TRAINING_SCORE)?,
            prod_score:     need(COL_PROD_SCORE)?,
            is_electronics: need(COL_IS_ELECTRONICS)?,
            annotation:     index.get(COL_ANNOTATION).copied(),
            extra: header.iter()
                .enumerate()
                .filter(|(_, name)| !KNOWN_COLUMNS.contains(&name.trim()))
                .map(|(i, _)| i)
                .collect(),
        })
    }
}

pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "t" | "y"  => Some(true),
        "false" | "0" | "no" | "f" | "n" => Some(false),
        _                                => None,
    }
}

fn parse_score(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_row(row: &csv::StringRecord, cols: &ColumnMap) -> std::result::Result<Record, String> {
    let cell = |i: usize| row.get(i).unwrap_or("");
    let date_raw = cell(cols.date).to_string();

    Ok(Record {
        id:             cell(cols.id).trim().to_string(),
        account:        cell(cols.account).to_string(),
        date:           parse_date(&date_raw),
        date_raw,
        text:           cell(cols.text).to_string(),
        training_score: parse_score(cell(cols.training_score))
            .ok_or_else(|| format!("bad training_score {:?}", cell(cols.training_score)))?,
        prod_score:     parse_score(cell(cols.prod_score))
            .ok_or_else(|| format!("bad prod_score {:?}", cell(cols.prod_score)))?,
        is_electronics: parse_bool(cell(cols.is_electronics))
            .ok_or_else(|| format!("bad is_electronics {:?}", cell(cols.is_electronics)))?,
        annotation:     cols.annotation
            .map(cell)
            .filter(|a| !a.trim().is_empty())
            .map(str::to_string),
        extra:          cols.extra.iter().map(|&i| cell(i).to_string()).collect(),
    })
}

/// Parse a whole table. Fails only on structural problems (unreadable
/// bytes, missing columns); per-row problems are counted in `skipped`.
pub fn read_table<R: Read>(input: R) -> Result<ParsedTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(input);

    let header  = rdr.headers()?.clone();
    let cols    = ColumnMap::from_header(&header)?;
    let columns = header.iter().map(|c| c.trim().to_string()).collect();

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for (line, row) in rdr.records().enumerate() {
        let row = row?;
        match parse_row(&row, &cols) {
            Ok(r)  => records.push(r),
            Err(e) => {
                skipped += 1;
                warn!("Skipping data row {}: {}", line + 1, e);
            }
        }
    }

    Ok(ParsedTable { columns, records, skipped })
}

/// Serialize the entire dataset, header first.
pub fn write_table<W: Write>(out: W, dataset: &Dataset) -> Result<()> {
    let mut columns = dataset.columns.clone();
    if !columns.iter().any(|c| c == COL_ANNOTATION) {
        columns.push(COL_ANNOTATION.to_string());
    }

    // Slot in Record::extra for each header position. Keyed by position so
    // repeated extra column names keep their own values.
    let mut next_slot = 0;
    let extra_slot: Vec<Option<usize>> = columns.iter()
        .map(|c| {
            if KNOWN_COLUMNS.contains(&c.as_str()) { return None; }
            next_slot += 1;
            Some(next_slot - 1)
        })
        .collect();

    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(&columns)?;

    for r in &dataset.records {
        let row: Vec<String> = columns.iter().zip(&extra_slot).map(|(c, slot)| match c.as_str() {
            COL_ID             => r.id.clone(),
            COL_ACCOUNT        => r.account.clone(),
            COL_DATE           => r.date_raw.clone(),
            COL_TEXT           => r.text.clone(),
            COL_TRAINING_SCORE => r.training_score.to_string(),
            COL_PROD_SCORE     => r.prod_score.to_string(),
            COL_IS_ELECTRONICS => if r.is_electronics { "True".into() } else { "False".into() },
            COL_ANNOTATION     => r.annotation.clone().unwrap_or_default(),
            _ => slot.and_then(|i| r.extra.get(i))
                .cloned()
                .unwrap_or_default(),
        }).collect();
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
id,account,date,text,training_score,prod_score,is_electronics,annotation,model_version
1,A,2023-02-01,usb cable,0.9,0.85,True,,v3
2,A,garbage,teapot,0.1,0.2,False,not_electronics,v3
3,B,2023-03-05 10:00:00,\"hdmi, 2m\",0.7,0.6,true,,v4
";

    #[test]
    fn reads_known_and_extra_columns() {
        let t = read_table(SAMPLE.as_bytes()).unwrap();
        assert_eq!(t.records.len(), 3);
        assert_eq!(t.skipped, 0);

        let r1 = &t.records[0];
        assert_eq!(r1.id, "1");
        assert!(r1.is_electronics);
        assert_eq!(r1.annotation, None);
        assert_eq!(r1.extra, vec!["v3".to_string()]);

        let r2 = &t.records[1];
        assert!(r2.date.is_none(), "unparseable date becomes null");
        assert_eq!(r2.date_raw, "garbage");
        assert_eq!(r2.annotation.as_deref(), Some("not_electronics"));

        assert_eq!(t.records[2].text, "hdmi, 2m");
    }

    #[test]
    fn missing_required_column_is_structural() {
        let csv = "id,account,date,text,training_score,is_electronics\n1,A,2023-01-02,x,0.5,true\n";
        match read_table(csv.as_bytes()) {
            Err(DashError::MissingColumn(c)) => assert_eq!(c, "prod_score"),
            other => panic!("expected MissingColumn, got {:?}", other),
        }
    }

    #[test]
    fn annotation_column_is_optional() {
        let csv = "id,account,date,text,training_score,prod_score,is_electronics\n1,A,2023-01-02,x,0.5,0.4,1\n";
        let t = read_table(csv.as_bytes()).unwrap();
        assert_eq!(t.records.len(), 1);
        assert_eq!(t.records[0].annotation, None);
    }

    #[test]
    fn bad_score_skips_only_that_row() {
        let csv = "id,account,date,text,training_score,prod_score,is_electronics,annotation\n\
                   1,A,2023-01-02,x,abc,0.4,1,\n\
                   2,A,2023-01-02,y,0.3,0.4,0,\n";
        let t = read_table(csv.as_bytes()).unwrap();
        assert_eq!(t.skipped, 1);
        assert_eq!(t.records.len(), 1);
        assert_eq!(t.records[0].id, "2");
    }

    #[test]
    fn rewrite_preserves_rows_and_extra_columns() {
        let t  = read_table(SAMPLE.as_bytes()).unwrap();
        let mut ds = Dataset::new(t.records);
        ds.columns = t.columns;

        let mut buf = Vec::new();
        write_table(&mut buf, &ds).unwrap();
        let again = read_table(buf.as_slice()).unwrap();

        assert_eq!(again.columns, ds.columns);
        assert_eq!(again.records, ds.records);
    }

    #[test]
    fn rewrite_keeps_repeated_extra_column_names_apart() {
        let csv = "id,account,date,text,training_score,prod_score,is_electronics,note,annotation,note\n\
                   1,A,2023-01-02,x,0.5,0.4,1,first,,second\n";
        let t  = read_table(csv.as_bytes()).unwrap();
        assert_eq!(t.records[0].extra, vec!["first".to_string(), "second".to_string()]);
        let mut ds = Dataset::new(t.records);
        ds.columns = t.columns;

        let mut buf = Vec::new();
        write_table(&mut buf, &ds).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().nth(1), Some("1,A,2023-01-02,x,0.5,0.4,True,first,,second"));
    }

    #[test]
    fn rewrite_appends_annotation_header_when_absent() {
        let csv = "id,account,date,text,training_score,prod_score,is_electronics\n1,A,2023-01-02,x,0.5,0.4,1\n";
        let t  = read_table(csv.as_bytes()).unwrap();
        let mut ds = Dataset::new(t.records);
        ds.columns = t.columns;
        ds.records[0].annotation = Some("electronics".into());

        let mut buf = Vec::new();
        write_table(&mut buf, &ds).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.lines().next().unwrap().ends_with(",annotation"));
        assert!(text.contains("electronics"));
    }

    #[test]
    fn bool_spellings() {
        for s in ["True", "true", "1", "YES"] { assert_eq!(parse_bool(s), Some(true)); }
        for s in ["False", "0", "no"]        { assert_eq!(parse_bool(s), Some(false)); }
        assert_eq!(parse_bool("maybe"), None);
    }
}
