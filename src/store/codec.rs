//! Arrow/parquet codec for [`Table`].

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Float32Array, Float64Array, Int64Array, ListBuilder,
    StringArray, StringBuilder,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float32Type, Float64Type, Int64Type, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use super::StoreError;
use super::table::{Column, Table};

fn data_type(column: &Column) -> DataType {
    match column {
        Column::Utf8(_) => DataType::Utf8,
        Column::Int64(_) => DataType::Int64,
        Column::Float64(_) => DataType::Float64,
        Column::Float32(_) => DataType::Float32,
        Column::Bool(_) => DataType::Boolean,
        Column::Utf8List(_) => DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
    }
}

fn to_array(column: &Column) -> ArrayRef {
    match column {
        Column::Utf8(values) => Arc::new(StringArray::from(values.clone())),
        Column::Int64(values) => Arc::new(Int64Array::from(values.clone())),
        Column::Float64(values) => Arc::new(Float64Array::from(values.clone())),
        Column::Float32(values) => Arc::new(Float32Array::from(values.clone())),
        Column::Bool(values) => Arc::new(BooleanArray::from(values.clone())),
        Column::Utf8List(values) => {
            let mut builder = ListBuilder::new(StringBuilder::new());
            for entry in values {
                match entry {
                    Some(items) => {
                        for item in items {
                            builder.values().append_value(item);
                        }
                        builder.append(true);
                    }
                    None => builder.append(false),
                }
            }
            Arc::new(builder.finish())
        }
    }
}

/// Converts a table into one arrow batch.
///
/// # Errors
/// Arrow rejects the schema or the arrays.
pub fn to_record_batch(table: &Table) -> Result<RecordBatch, StoreError> {
    let fields: Vec<Field> = table
        .iter()
        .map(|(name, column)| Field::new(name, data_type(column), true))
        .collect();
    let arrays: Vec<ArrayRef> = table.iter().map(|(_, column)| to_array(column)).collect();
    let schema = Arc::new(Schema::new(fields));
    Ok(RecordBatch::try_new(schema, arrays)?)
}

fn from_array(name: &str, array: &ArrayRef) -> Result<Column, StoreError> {
    let column = match array.data_type() {
        DataType::Utf8 => Column::Utf8(
            array
                .as_string::<i32>()
                .iter()
                .map(|v| v.map(ToString::to_string))
                .collect(),
        ),
        DataType::LargeUtf8 => Column::Utf8(
            array
                .as_string::<i64>()
                .iter()
                .map(|v| v.map(ToString::to_string))
                .collect(),
        ),
        DataType::Int64 => Column::Int64(array.as_primitive::<Int64Type>().iter().collect()),
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32 => {
            let widened = cast(array, &DataType::Int64)?;
            Column::Int64(widened.as_primitive::<Int64Type>().iter().collect())
        }
        DataType::Float64 => Column::Float64(array.as_primitive::<Float64Type>().iter().collect()),
        DataType::Float32 => Column::Float32(array.as_primitive::<Float32Type>().iter().collect()),
        DataType::Boolean => Column::Bool(array.as_boolean().iter().collect()),
        DataType::List(field) if matches!(field.data_type(), DataType::Utf8) => {
            let list = array.as_list::<i32>();
            let mut values = Vec::with_capacity(list.len());
            for entry in list.iter() {
                values.push(entry.map(|inner| {
                    inner
                        .as_string::<i32>()
                        .iter()
                        .flatten()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                }));
            }
            Column::Utf8List(values)
        }
        other => {
            return Err(StoreError::UnsupportedType {
                column: name.to_string(),
                data_type: other.to_string(),
            });
        }
    };
    Ok(column)
}

/// Converts one arrow batch into a table.
///
/// # Errors
/// A column has a type the table model does not carry.
pub fn from_record_batch(batch: &RecordBatch) -> Result<Table, StoreError> {
    let schema = batch.schema();
    let mut table = Table::new();
    for (field, array) in schema.fields().iter().zip(batch.columns()) {
        table.push_column(field.name().clone(), from_array(field.name(), array)?)?;
    }
    Ok(table)
}

/// Writes `table` as a single snappy-compressed parquet file.
///
/// # Errors
/// File creation or encoding fails.
pub fn write_parquet(table: &Table, path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let batch = to_record_batch(table)?;
    let file = File::create(path).map_err(|e| StoreError::io(path, e))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// Reads every row group of one parquet file.
///
/// # Errors
/// File missing or undecodable.
pub fn read_parquet(path: &Path) -> Result<Table, StoreError> {
    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let mut parts = Vec::new();
    for batch in reader {
        parts.push(from_record_batch(&batch?)?);
    }
    Table::concat(parts)
}

fn json_value(column: &Column, row: usize) -> serde_json::Value {
    use serde_json::Value;
    match column {
        Column::Utf8(v) => v[row].clone().map_or(Value::Null, Value::String),
        Column::Int64(v) => v[row].map_or(Value::Null, Value::from),
        Column::Float64(v) => v[row].map_or(Value::Null, Value::from),
        Column::Float32(v) => v[row].map_or(Value::Null, |x| Value::from(f64::from(x))),
        Column::Bool(v) => v[row].map_or(Value::Null, Value::Bool),
        Column::Utf8List(v) => v[row]
            .clone()
            .map_or(Value::Null, |items| Value::from(items)),
    }
}

/// Serializes rows as newline-delimited JSON objects.
///
/// # Errors
/// Serialization fails.
pub fn to_ndjson(table: &Table) -> Result<String, StoreError> {
    let mut out = String::new();
    for row in 0..table.num_rows() {
        let mut object = serde_json::Map::new();
        for (name, column) in table.iter() {
            object.insert(name.to_string(), json_value(column, row));
        }
        out.push_str(&serde_json::to_string(&serde_json::Value::Object(object))?);
        out.push('\n');
    }
    Ok(out)
}

/// Parses newline-delimited JSON objects; column types are inferred from the
/// first non-null value per key.
///
/// # Errors
/// Invalid JSON, or a value that disagrees with the inferred column type.
pub fn from_ndjson(raw: &str) -> Result<Table, StoreError> {
    use serde_json::Value;

    let rows: Vec<serde_json::Map<String, Value>> = raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;

    let mut names: Vec<String> = Vec::new();
    for row in &rows {
        for key in row.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
    }

    let mut table = Table::new();
    for name in names {
        let sample = rows.iter().filter_map(|r| r.get(&name)).find(|v| !v.is_null());
        let cells = rows.iter().map(|r| r.get(&name).filter(|v| !v.is_null()));
        let column = match sample {
            Some(Value::Bool(_)) => {
                Column::Bool(cells.map(|v| v.and_then(Value::as_bool)).collect())
            }
            Some(Value::Number(n)) if n.is_i64() => {
                Column::Int64(cells.map(|v| v.and_then(Value::as_i64)).collect())
            }
            Some(Value::Number(_)) => {
                Column::Float64(cells.map(|v| v.and_then(Value::as_f64)).collect())
            }
            Some(Value::Array(_)) => Column::Utf8List(
                cells
                    .map(|v| {
                        v.and_then(Value::as_array).map(|items| {
                            items
                                .iter()
                                .map(|item| match item {
                                    Value::String(s) => s.clone(),
                                    other => other.to_string(),
                                })
                                .collect()
                        })
                    })
                    .collect(),
            ),
            _ => Column::Utf8(
                cells
                    .map(|v| {
                        v.map(|value| match value {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                    })
                    .collect(),
            ),
        };
        table.push_column(name, column)?;
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::new()
            .with_column(
                "subreddit_id",
                Column::Utf8(vec![Some("t5_1".into()), Some("t5_2".into()), None]),
            )
            .and_then(|t| t.with_column("count", Column::Int64(vec![Some(3), None, Some(1)])))
            .and_then(|t| {
                t.with_column(
                    "embedding_0",
                    Column::Float32(vec![Some(0.5), Some(-1.0), Some(0.0)]),
                )
            })
            .and_then(|t| t.with_column("flag", Column::Bool(vec![Some(true), Some(false), None])))
            .and_then(|t| {
                t.with_column(
                    "ids",
                    Column::Utf8List(vec![Some(vec!["a".into(), "b".into()]), Some(vec![]), None]),
                )
            })
            .expect("sample table")
    }

    #[test]
    fn parquet_file_preserves_types_and_nulls() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("part-00000.parquet");
        let table = sample();
        write_parquet(&table, &path).expect("write");
        let loaded = read_parquet(&path).expect("read");
        assert_eq!(loaded, table);
    }

    #[test]
    fn ndjson_infers_column_types() {
        let raw = "{\"id\":\"a\",\"n\":1,\"tags\":[\"x\"]}\n{\"id\":\"b\",\"n\":null}\n";
        let table = from_ndjson(raw).expect("ndjson");
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.i64_values("n").expect("n"), vec![Some(1), None]);
        assert_eq!(
            table.utf8_lists("tags").expect("tags")[0].as_deref(),
            Some(&["x".to_string()][..])
        );
    }
}
