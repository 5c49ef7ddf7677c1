use super::*;
use crate::phone_lookup::response::LookupStatus;
use crate::sheet::{read_table, write_table};
use tempfile::TempDir;

fn headers(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn success(names: &[&str], images: &[&str]) -> LookupResult {
    let mut result = LookupResult::new("2025-03-10T12:00:00.000000");
    result.status = LookupStatus::Success;
    if let Some((first, rest)) = names.split_first() {
        result.full_name = first.to_string();
        result.other_names = rest.iter().map(|s| s.to_string()).collect();
    }
    result.image_urls = images.iter().map(|s| s.to_string()).collect();
    result
}

fn column<'a>(table: &'a Table, name: &str) -> Vec<&'a Cell> {
    let idx = table.column_index(name).unwrap();
    (0..table.len()).map(|r| table.cell(r, idx)).collect()
}

#[test]
fn test_column_order() {
    let mut output = OutputTable::new(&headers(&["City", "Number", "Note"]));
    output.push(
        &[Cell::text("Lahore"), Cell::text("03001234567"), Cell::text("vip")],
        success(&["Ali", "A"], &["u1"]),
    );
    let mut with_b64 = success(&["Sara"], &[]);
    with_b64.base64_images = vec!["cGF5bG9hZA==".to_string()];
    output.push(
        &[Cell::text("Karachi"), Cell::text("03007654321"), Cell::Empty],
        with_b64,
    );

    assert_eq!(
        output.headers(),
        headers(&[
            "Number",
            "Lookup_Status",
            "Name_1",
            "Name_2",
            "Image_1",
            "b64_1",
            "City",
            "Note",
            "Full_Name",
            "Lookup_Timestamp",
            "Error_Message",
        ])
    );

    let table = output.to_table();
    assert_eq!(
        table.rows[0],
        vec![
            Cell::text("03001234567"),
            Cell::text("Success"),
            Cell::text("Ali"),
            Cell::text("A"),
            Cell::text("u1"),
            Cell::text(""),
            Cell::text("Lahore"),
            Cell::text("vip"),
            Cell::text("Ali"),
            Cell::text("2025-03-10T12:00:00.000000"),
            Cell::text(""),
        ]
    );
}

#[test]
fn test_family_growth_backfills_earlier_rows() {
    let mut output = OutputTable::new(&headers(&["Number"]));
    for i in 0..4 {
        let names: &[&str] = if i % 2 == 0 { &["Only"] } else { &[] };
        output.push(&[Cell::text(format!("9230000000{}", i))], success(names, &[]));
    }
    output.push(&[Cell::text("923000000004")], success(&["A", "B", "C"], &[]));

    assert_eq!(output.widths().names, 3);
    let table = output.to_table();
    for row in 0..4 {
        assert_eq!(table.cell(row, table.column_index("Name_2").unwrap()), &Cell::text(""));
        assert_eq!(table.cell(row, table.column_index("Name_3").unwrap()), &Cell::text(""));
    }
    assert_eq!(
        column(&table, "Name_3"),
        vec![
            &Cell::text(""),
            &Cell::text(""),
            &Cell::text(""),
            &Cell::text(""),
            &Cell::text("C"),
        ]
    );
    assert!(table.rows.iter().all(|r| r.len() == table.headers.len()));
}

#[test]
fn test_generated_input_columns_are_dropped() {
    let input = headers(&[
        "Number",
        "Lookup_Status",
        "Name_1",
        "Image_2",
        "b64_1",
        "Full_Name",
        "Name_Source",
        "Error_Message",
    ]);
    let mut output = OutputTable::new(&input);
    output.push(
        &[
            Cell::text("923001234567"),
            Cell::text("Success"),
            Cell::text("Old"),
            Cell::text("old-url"),
            Cell::text("old-b64"),
            Cell::text("Old"),
            Cell::text("crm"),
            Cell::Empty,
        ],
        success(&[], &[]),
    );

    assert_eq!(
        output.headers(),
        headers(&[
            "Number",
            "Lookup_Status",
            "Name_Source",
            "Full_Name",
            "Lookup_Timestamp",
            "Error_Message",
        ])
    );
}

#[test]
fn test_saving_twice_is_stable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.xlsx");
    let mut output = OutputTable::new(&headers(&["Number"]));
    output.push(&[Cell::Number(923001234567.0)], success(&["Ali"], &["u1", "u2"]));

    write_table(&path, &output.to_table()).unwrap();
    let first = read_table(&path).unwrap();
    write_table(&path, &output.to_table()).unwrap();
    let second = read_table(&path).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.cell(0, 0).to_string(), "923001234567");
    assert_eq!(first.headers[2], "Name_1");
}

#[test]
fn test_empty_table_has_fixed_headers() {
    let output = OutputTable::new(&headers(&["Number"]));
    assert!(output.is_empty());
    assert_eq!(
        output.headers(),
        headers(&[
            "Number",
            "Lookup_Status",
            "Full_Name",
            "Lookup_Timestamp",
            "Error_Message",
        ])
    );
}
