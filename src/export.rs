//! Output tables.
//!
//! One [`OutputTable`] value is built per result set and serialized twice,
//! CSV and XLSX, so the two files cannot diverge. Column order is stable:
//! core fields, fixed amenity flags, `amenities_raw`, dynamic one-hot
//! columns sorted by sanitized name, raw audit text last. Booleans write as
//! 1/0 for the downstream model consumer.

use anyhow::{Context, Result};
use rust_xlsxwriter::Workbook;
use std::fs;
use std::path::Path;

use crate::amenities::{fixed_keys, OneHotEncoder};
use crate::models::{ListingRecord, PropertyAggregate};

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Float(f64),
    Int(u32),
    Bool(bool),
    Empty,
}

impl Cell {
    fn text(value: &Option<String>) -> Cell {
        match value {
            Some(s) => Cell::Text(s.clone()),
            None => Cell::Empty,
        }
    }

    fn float(value: Option<f64>) -> Cell {
        match value {
            Some(v) => Cell::Float(v),
            None => Cell::Empty,
        }
    }

    fn int(value: Option<u32>) -> Cell {
        match value {
            Some(v) => Cell::Int(v),
            None => Cell::Empty,
        }
    }

    fn csv_value(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Float(v) => format!("{}", v),
            Cell::Int(v) => format!("{}", v),
            Cell::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Cell::Empty => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

/// One row per floorplan record.
pub fn per_unit_table(records: &[ListingRecord], encoder: &OneHotEncoder) -> OutputTable {
    let mut headers: Vec<String> = ["listing_url", "price", "beds", "baths", "sqft"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    headers.extend(fixed_keys().iter().map(|k| k.to_string()));
    headers.push("amenities_raw".to_string());
    headers.extend(encoder.columns().iter().map(|c| c.column.clone()));
    headers.extend(
        [
            "rent_raw",
            "details_raw",
            "pricing_raw",
            "sqft_raw",
            "amenities_list_raw",
        ]
        .iter()
        .map(|s| s.to_string()),
    );

    let rows = records
        .iter()
        .map(|record| {
            let mut row = vec![
                Cell::Text(record.source_url.clone()),
                Cell::float(record.price),
                Cell::float(record.beds),
                Cell::float(record.baths),
                Cell::int(record.sqft),
            ];
            row.extend(record.fixed_flags.values().iter().map(|b| Cell::Bool(*b)));
            row.push(Cell::text(&record.amenities_raw));
            row.extend(encoder.encode(&record.amenity_labels).into_iter().map(Cell::Bool));
            row.push(Cell::text(&record.raw.rent));
            row.push(Cell::text(&record.raw.details));
            row.push(Cell::text(&record.raw.pricing));
            row.push(Cell::text(&record.raw.sqft));
            row.push(Cell::text(&record.raw.amenities));
            row
        })
        .collect();

    OutputTable { headers, rows }
}

/// One row per property rollup.
pub fn aggregated_table(aggregates: &[PropertyAggregate], encoder: &OneHotEncoder) -> OutputTable {
    let mut headers: Vec<String> = [
        "listing_url",
        "min_price",
        "max_price",
        "min_beds",
        "max_beds",
        "min_baths",
        "max_baths",
        "min_sqft",
        "max_sqft",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    headers.extend(fixed_keys().iter().map(|k| k.to_string()));
    headers.push("amenities_raw".to_string());
    headers.extend(encoder.columns().iter().map(|c| c.column.clone()));

    let rows = aggregates
        .iter()
        .map(|agg| {
            let mut row = vec![
                Cell::Text(agg.source_url.clone()),
                Cell::float(agg.min_price),
                Cell::float(agg.max_price),
                Cell::float(agg.min_beds),
                Cell::float(agg.max_beds),
                Cell::float(agg.min_baths),
                Cell::float(agg.max_baths),
                Cell::int(agg.min_sqft),
                Cell::int(agg.max_sqft),
            ];
            row.extend(agg.fixed_flags.values().iter().map(|b| Cell::Bool(*b)));
            row.push(Cell::text(&agg.amenities_raw));
            row.extend(encoder.encode(&agg.amenity_labels).into_iter().map(Cell::Bool));
            row
        })
        .collect();

    OutputTable { headers, rows }
}

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

fn write_csv_row(out: &mut String, cells: impl Iterator<Item = String>) {
    let mut first = true;
    for cell in cells {
        if !first {
            out.push(',');
        } else {
            first = false;
        }
        if needs_quotes(&cell) {
            out.push('"');
            out.push_str(&cell.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(&cell);
        }
    }
    out.push('\n');
}

pub fn to_csv_string(table: &OutputTable) -> String {
    let mut out = String::new();
    write_csv_row(&mut out, table.headers.iter().cloned());
    for row in &table.rows {
        write_csv_row(&mut out, row.iter().map(Cell::csv_value));
    }
    out
}

pub fn write_csv(table: &OutputTable, path: &str) -> Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, to_csv_string(table)).with_context(|| format!("failed to write {}", path))?;
    tracing::info!("wrote {} rows to {}", table.rows.len(), path);
    Ok(())
}

pub fn write_xlsx(table: &OutputTable, path: &str) -> Result<()> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    for (col, header) in table.headers.iter().enumerate() {
        worksheet
            .write_string(0, col as u16, header)
            .with_context(|| format!("failed to write header '{}'", header))?;
    }

    for (i, row) in table.rows.iter().enumerate() {
        let r = (i + 1) as u32;
        for (col, cell) in row.iter().enumerate() {
            let c = col as u16;
            match cell {
                Cell::Text(s) => worksheet.write_string(r, c, s),
                Cell::Float(v) => worksheet.write_number(r, c, *v),
                Cell::Int(v) => worksheet.write_number(r, c, *v as f64),
                Cell::Bool(b) => worksheet.write_number(r, c, if *b { 1.0 } else { 0.0 }),
                Cell::Empty => continue,
            }
            .with_context(|| format!("failed to write cell at row {} col {}", r, c))?;
        }
    }

    if let Some(parent) = Path::new(path).parent() {
        fs::create_dir_all(parent)?;
    }
    workbook
        .save(path)
        .with_context(|| format!("failed to save workbook {}", path))?;
    tracing::info!("wrote {} rows to {}", table.rows.len(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate_by_property;
    use crate::amenities::FixedTaxonomy;
    use crate::models::RawFields;

    fn record(url: &str, price: Option<f64>, blob: &str, labels: &[&str]) -> ListingRecord {
        let flags = FixedTaxonomy::new().classify(blob);
        ListingRecord {
            source_url: url.to_string(),
            price,
            beds: Some(2.0),
            baths: Some(1.5),
            sqft: Some(850),
            amenities_raw: flags.summary(),
            fixed_flags: flags,
            amenity_labels: labels.iter().map(|s| s.to_string()).collect(),
            raw: RawFields {
                rent: Some("$2,100 - $2,600".to_string()),
                details: Some("2 Beds, 1.5 Baths".to_string()),
                pricing: None,
                sqft: Some("850".to_string()),
                amenities: None,
            },
        }
    }

    #[test]
    fn test_per_unit_column_order() {
        let records = vec![record("https://example.com/listing/a1", Some(2350.0), "pool", &["Pool"])];
        let encoder = OneHotEncoder::build(["Pool"]);
        let table = per_unit_table(&records, &encoder);

        assert_eq!(
            &table.headers[..5],
            &["listing_url", "price", "beds", "baths", "sqft"]
        );
        let fixed = fixed_keys();
        assert_eq!(&table.headers[5..5 + fixed.len()], &fixed[..]);
        assert_eq!(table.headers[5 + fixed.len()], "amenities_raw");
        assert_eq!(table.headers[6 + fixed.len()], "Amenity_Pool");
        assert_eq!(table.headers.last().map(String::as_str), Some("amenities_list_raw"));
        assert_eq!(table.rows[0].len(), table.headers.len());
    }

    #[test]
    fn test_csv_booleans_as_one_zero() {
        let records = vec![record("https://example.com/listing/a1", None, "pool", &["Pool"])];
        let encoder = OneHotEncoder::build(["Pool", "Gym"]);
        let csv = to_csv_string(&per_unit_table(&records, &encoder));

        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        let headers: Vec<&str> = lines[0].split(',').collect();
        let pool_col = headers.iter().position(|h| *h == "Amenity_Pool").unwrap();
        let gym_col = headers.iter().position(|h| *h == "Amenity_Gym").unwrap();
        // raw fields at the end are quoted (they contain commas), but the
        // boolean columns sit before them so a plain split stays aligned
        let cells: Vec<&str> = lines[1].split(',').collect();
        assert_eq!(cells[pool_col], "1");
        assert_eq!(cells[gym_col], "0");
    }

    #[test]
    fn test_csv_quotes_fields_with_commas() {
        let records = vec![record("https://example.com/listing/a1", Some(2350.0), "", &[])];
        let encoder = OneHotEncoder::build([]);
        let csv = to_csv_string(&per_unit_table(&records, &encoder));
        assert!(csv.contains("\"2 Beds, 1.5 Baths\""));
        assert!(csv.contains("\"$2,100 - $2,600\""));
    }

    #[test]
    fn test_csv_empty_cells_stay_empty() {
        let records = vec![record("https://example.com/listing/a1", None, "", &[])];
        let encoder = OneHotEncoder::build([]);
        let table = per_unit_table(&records, &encoder);
        assert_eq!(table.rows[0][1], Cell::Empty);
        let csv = to_csv_string(&table);
        let line = csv.lines().nth(1).unwrap();
        assert!(line.starts_with("https://example.com/listing/a1,,2,1.5,850"));
    }

    #[test]
    fn test_aggregated_column_order() {
        let records = vec![
            record("https://example.com/listing/a1", Some(2000.0), "pool", &["Pool"]),
            record("https://example.com/listing/a1", Some(2600.0), "gym", &["Gym"]),
        ];
        let aggregates = aggregate_by_property(&records);
        let encoder = OneHotEncoder::build(["Pool", "Gym"]);
        let table = aggregated_table(&aggregates, &encoder);

        assert_eq!(
            &table.headers[..9],
            &[
                "listing_url",
                "min_price",
                "max_price",
                "min_beds",
                "max_beds",
                "min_baths",
                "max_baths",
                "min_sqft",
                "max_sqft",
            ]
        );
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0][1], Cell::Float(2000.0));
        assert_eq!(table.rows[0][2], Cell::Float(2600.0));
        // union means both one-hot columns are set
        let gym_col = table.headers.iter().position(|h| h == "Amenity_Gym").unwrap();
        let pool_col = table.headers.iter().position(|h| h == "Amenity_Pool").unwrap();
        assert_eq!(table.rows[0][gym_col], Cell::Bool(true));
        assert_eq!(table.rows[0][pool_col], Cell::Bool(true));
    }

    #[test]
    fn test_write_both_formats() {
        let records = vec![record("https://example.com/listing/a1", Some(2350.0), "pool", &["Pool"])];
        let encoder = OneHotEncoder::build(["Pool"]);
        let table = per_unit_table(&records, &encoder);

        let dir = std::env::temp_dir().join("rentgrid_export_test");
        std::fs::create_dir_all(&dir).unwrap();
        let csv_path = dir.join("out.csv");
        let xlsx_path = dir.join("out.xlsx");

        write_csv(&table, csv_path.to_str().unwrap()).unwrap();
        write_xlsx(&table, xlsx_path.to_str().unwrap()).unwrap();

        let csv = std::fs::read_to_string(&csv_path).unwrap();
        assert_eq!(csv, to_csv_string(&table));
        assert!(std::fs::metadata(&xlsx_path).unwrap().len() > 0);
    }
}
