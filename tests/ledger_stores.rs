use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use form_ledger::config::PipelineConfig;
use form_ledger::execution::NoopSleeper;
use form_ledger::ingestion::{CleanupResult, IngestionPipeline, ProcessOutcome};
use form_ledger::store::open_store;
use form_ledger::types::HeaderSchema;
use lopdf::{Document, Object, StringFormat, dictionary};

fn temp_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let dir = std::env::temp_dir().join(format!("form_ledger_{label}_{}_{nanos}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn row(cells: &[&str]) -> Vec<String> {
    cells.iter().map(|c| c.to_string()).collect()
}

/// Write a PDF whose AcroForm has one text field per `(name, value)`.
fn write_form_pdf(path: &Path, fields: &[(&str, &str)]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.add_object(dictionary! {
        "Type" => "Pages",
        "Kids" => Vec::<Object>::new(),
        "Count" => Object::Integer(0),
    });
    let mut refs = Vec::new();
    for (name, value) in fields {
        let id = doc.add_object(dictionary! {
            "FT" => "Tx",
            "T" => Object::String(name.as_bytes().to_vec(), StringFormat::Literal),
            "V" => Object::String(value.as_bytes().to_vec(), StringFormat::Literal),
        });
        refs.push(Object::Reference(id));
    }
    let acroform_id = doc.add_object(dictionary! { "Fields" => refs });
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
        "AcroForm" => acroform_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

fn quick_pipeline(store_path: &Path) -> IngestionPipeline {
    let config = PipelineConfig {
        store_path: store_path.to_path_buf(),
        debounce_interval_ms: 0,
        ..PipelineConfig::default()
    };
    IngestionPipeline::open(&config)
        .unwrap()
        .with_sleeper(Arc::new(NoopSleeper))
}

#[test]
fn missing_csv_ledger_is_created_empty() {
    let dir = temp_dir("csv_create");
    let path = dir.join("ledger.csv");

    let store = open_store(&path).unwrap();

    assert!(store.was_created());
    assert!(path.exists());
    assert!(store.header().is_none());
    assert_eq!(store.table().data_row_count(), 0);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn csv_ledger_round_trips_quoted_values() {
    let dir = temp_dir("csv_quoting");
    let path = dir.join("ledger.csv");

    let mut store = open_store(&path).unwrap();
    store.write_header(&HeaderSchema::new(["Name", "Comment"])).unwrap();
    store.append_row(row(&["Alice", "says \"hi\", twice"])).unwrap();
    store.save().unwrap();

    let reopened = open_store(&path).unwrap();
    assert!(!reopened.was_created());
    assert_eq!(
        reopened.table().rows(),
        &[row(&["Name", "Comment"]), row(&["Alice", "says \"hi\", twice"])]
    );
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn pdf_form_lands_in_csv_ledger() {
    let dir = temp_dir("csv_e2e");
    let store_path = dir.join("ledger.csv");
    let doc = dir.join("order123.pdf");
    write_form_pdf(&doc, &[("Name", "Alice"), ("Amount", "42")]);

    let mut pipeline = quick_pipeline(&store_path);
    let outcome = pipeline.process(&doc);

    assert_eq!(
        outcome,
        ProcessOutcome::Committed {
            row_number: 1,
            cleanup: CleanupResult::Removed { attempts: 1 },
        }
    );
    assert!(!doc.exists());
    let reopened = open_store(&store_path).unwrap();
    assert_eq!(
        reopened.table().rows(),
        &[row(&["Name", "Amount"]), row(&["Alice", "42"])]
    );
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn restart_keeps_existing_header() {
    let dir = temp_dir("csv_restart");
    let store_path = dir.join("ledger.csv");
    fs::write(&store_path, "Name,Amount\nAlice,42\n").unwrap();
    let doc = dir.join("order125.pdf");
    write_form_pdf(&doc, &[("Amount", "7"), ("Name", "Carol"), ("Note", "dropped")]);

    let mut pipeline = quick_pipeline(&store_path);
    assert!(pipeline.registry().is_established());
    let outcome = pipeline.process(&doc);

    assert_eq!(
        outcome,
        ProcessOutcome::Committed {
            row_number: 2,
            cleanup: CleanupResult::Removed { attempts: 1 },
        }
    );
    let reopened = open_store(&store_path).unwrap();
    assert_eq!(
        reopened.table().rows(),
        &[row(&["Name", "Amount"]), row(&["Alice", "42"]), row(&["Carol", "7"])]
    );
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn non_pdf_bytes_are_skipped_and_kept() {
    let dir = temp_dir("csv_garbage");
    let store_path = dir.join("ledger.csv");
    let doc = dir.join("garbage.pdf");
    fs::write(&doc, b"this is not a pdf").unwrap();

    let mut pipeline = quick_pipeline(&store_path);
    let outcome = pipeline.process(&doc);

    assert!(matches!(outcome, ProcessOutcome::Skipped(_)));
    assert!(doc.exists());
    assert!(open_store(&store_path).unwrap().table().rows().is_empty());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn unnamed_pdf_field_is_left_out_of_the_header() {
    let dir = temp_dir("csv_unnamed");
    let store_path = dir.join("ledger.csv");
    let first = dir.join("order126.pdf");
    let second = dir.join("order127.pdf");
    write_form_pdf(&first, &[("Name", "Alice"), ("", "x")]);
    write_form_pdf(&second, &[("Name", "Bob")]);

    let mut pipeline = quick_pipeline(&store_path);
    assert!(pipeline.process(&first).is_committed());
    assert_eq!(
        pipeline.process(&second),
        ProcessOutcome::Committed {
            row_number: 2,
            cleanup: CleanupResult::Removed { attempts: 1 },
        }
    );

    let reopened = open_store(&store_path).unwrap();
    assert_eq!(
        reopened.table().rows(),
        &[row(&["Name"]), row(&["Alice"]), row(&["Bob"])]
    );
    let _ = fs::remove_dir_all(&dir);
}

#[cfg(feature = "excel")]
#[test]
fn pdf_form_lands_in_xlsx_ledger() {
    let dir = temp_dir("xlsx_e2e");
    let store_path = dir.join("Formulardaten.xlsx");
    let first = dir.join("order123.pdf");
    let second = dir.join("order124.pdf");
    write_form_pdf(&first, &[("Name", "Alice"), ("Amount", "42")]);
    write_form_pdf(&second, &[("Name", "Bob"), ("Amount", "7"), ("Extra", "ignored")]);

    let mut pipeline = quick_pipeline(&store_path);
    assert!(pipeline.store().was_created());
    assert!(pipeline.process(&first).is_committed());
    assert!(pipeline.process(&second).is_committed());

    let reopened = open_store(&store_path).unwrap();
    assert_eq!(
        reopened.table().rows(),
        &[row(&["Name", "Amount"]), row(&["Alice", "42"]), row(&["Bob", "7"])]
    );
    assert!(!first.exists());
    assert!(!second.exists());
    let _ = fs::remove_dir_all(&dir);
}

#[cfg(feature = "excel")]
#[test]
fn xlsx_save_keeps_other_worksheets() {
    use calamine::{Data, Reader, Xlsx, open_workbook};
    use rust_xlsxwriter::Workbook;

    let dir = temp_dir("xlsx_sheets");
    let path = dir.join("ledger.xlsx");

    let mut workbook = Workbook::new();
    let ledger = workbook.add_worksheet();
    ledger.set_name("Ledger").unwrap();
    ledger.write_string(0, 0, "Name").unwrap();
    let notes = workbook.add_worksheet();
    notes.set_name("Notes").unwrap();
    notes.write_string(0, 0, "keep me").unwrap();
    workbook.save(&path).unwrap();

    let mut store = open_store(&path).unwrap();
    assert_eq!(store.header(), Some(HeaderSchema::new(["Name"])));
    store.append_row(row(&["Alice"])).unwrap();
    store.save().unwrap();

    let mut reread: Xlsx<_> = open_workbook(&path).unwrap();
    assert_eq!(reread.sheet_names(), vec!["Ledger".to_string(), "Notes".to_string()]);
    let notes = reread.worksheet_range("Notes").unwrap();
    assert_eq!(notes.get_value((0, 0)), Some(&Data::String("keep me".to_string())));
    let ledger = reread.worksheet_range("Ledger").unwrap();
    assert_eq!(ledger.get_value((1, 0)), Some(&Data::String("Alice".to_string())));
    let _ = fs::remove_dir_all(&dir);
}

#[cfg(feature = "excel")]
#[test]
fn restart_on_typed_xlsx_keeps_cell_types() {
    use calamine::{Data, Reader, Xlsx, open_workbook};
    use rust_xlsxwriter::{Format, Workbook};

    let dir = temp_dir("xlsx_typed");
    let store_path = dir.join("ledger.xlsx");

    let mut workbook = Workbook::new();
    let ledger = workbook.add_worksheet();
    ledger.set_name("Ledger").unwrap();
    ledger.write_string(0, 0, "Name").unwrap();
    ledger.write_string(0, 1, "Amount").unwrap();
    ledger.write_string(1, 0, "Alice").unwrap();
    ledger.write_number(1, 1, 42.0).unwrap();
    ledger.write_boolean(1, 2, true).unwrap();
    let notes = workbook.add_worksheet();
    notes.set_name("Notes").unwrap();
    notes.write_string(0, 0, "total").unwrap();
    notes.write_formula(1, 0, "=1+1").unwrap();
    let date = Format::new().set_num_format("yyyy-mm-dd");
    notes.write_number_with_format(1, 1, 45306.0, &date).unwrap();
    workbook.save(&store_path).unwrap();

    let doc = dir.join("order128.pdf");
    write_form_pdf(&doc, &[("Amount", "7"), ("Name", "Bob")]);
    let mut pipeline = quick_pipeline(&store_path);
    assert!(pipeline.registry().is_established());
    assert_eq!(
        pipeline.process(&doc),
        ProcessOutcome::Committed {
            row_number: 2,
            cleanup: CleanupResult::Removed { attempts: 1 },
        }
    );

    let mut reread: Xlsx<_> = open_workbook(&store_path).unwrap();
    let ledger = reread.worksheet_range("Ledger").unwrap();
    assert_eq!(ledger.get_value((1, 1)), Some(&Data::Float(42.0)));
    assert_eq!(ledger.get_value((1, 2)), Some(&Data::Bool(true)));
    assert_eq!(ledger.get_value((2, 0)), Some(&Data::String("Bob".to_string())));
    assert_eq!(ledger.get_value((2, 1)), Some(&Data::String("7".to_string())));

    let notes = reread.worksheet_range("Notes").unwrap();
    assert!(matches!(notes.get_value((1, 1)), Some(Data::DateTime(_))));
    let formulas = reread.worksheet_formula("Notes").unwrap();
    assert_eq!(formulas.get_value((1, 0)).map(String::as_str), Some("1+1"));
    let _ = fs::remove_dir_all(&dir);
}
