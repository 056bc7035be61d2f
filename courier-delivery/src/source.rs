//! Recipient Source: reads the recipient list.
//!
//! The list is CSV with a header row. One column must be `email`; every
//! other column is carried along as a template field.

use std::path::Path;

use courier_common::{RecipientRecord, internal};
use indexmap::IndexMap;

use crate::SourceError;

const EMAIL_COLUMN: &str = "email";

/// Loads the recipient list at `path`, in file order.
///
/// Rows sharing an address collapse into one record holding the last row's
/// values, kept where the address first appeared.
///
/// # Errors
///
/// [`SourceError::NotFound`] when the file can't be read, and
/// [`SourceError::Malformed`] when it isn't a usable table: no `email`
/// column, a row with a different number of cells, an empty address or
/// text that isn't UTF-8.
pub async fn load(path: impl AsRef<Path>) -> Result<Vec<RecipientRecord>, SourceError> {
    let path = path.as_ref();

    let data = tokio::fs::read(path).await.map_err(|e| {
        internal!(level = DEBUG, "Unable to read {}: {e}", path.display());
        SourceError::NotFound(path.to_path_buf())
    })?;

    let recipients = parse(&data).map_err(|reason| SourceError::Malformed {
        path: path.to_path_buf(),
        reason,
    })?;

    internal!(
        level = INFO,
        "Loaded {} recipients from {}",
        recipients.len(),
        path.display()
    );

    Ok(recipients)
}

fn parse(data: &[u8]) -> Result<Vec<RecipientRecord>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .trim(csv::Trim::Headers)
        .from_reader(data);

    let headers = reader.headers().map_err(|e| e.to_string())?.clone();
    let email_index = headers
        .iter()
        .position(|header| header == EMAIL_COLUMN)
        .ok_or_else(|| format!("no `{EMAIL_COLUMN}` column in the header row"))?;

    let mut recipients: IndexMap<String, RecipientRecord> = IndexMap::new();

    for row in reader.records() {
        let row = row.map_err(|e| e.to_string())?;
        let line = row.position().map_or(0, csv::Position::line);

        let email = row.get(email_index).unwrap_or_default().trim();
        if email.is_empty() {
            return Err(format!("empty email address on line {line}"));
        }

        let fields = headers
            .iter()
            .zip(row.iter())
            .enumerate()
            .filter(|(index, _)| *index != email_index)
            .map(|(_, (header, value))| (header.to_string(), value.to_string()))
            .collect();

        let record = RecipientRecord {
            email: email.to_string(),
            fields,
        };

        if let Some(previous) = recipients.get_mut(email) {
            internal!(
                level = WARN,
                "Duplicate recipient {email} on line {line}, keeping the later row"
            );
            *previous = record;
        } else {
            recipients.insert(record.email.clone(), record);
        }
    }

    Ok(recipients.into_values().collect())
}
