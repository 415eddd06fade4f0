use crate::core::contributions::{
    ContributionId, ContributionKind, ContributionResult, VibrationalContribution,
    VibrationalContributionsData,
};
use crate::core::fields::Frequency;
use crate::core::fields::derivative::{DerivativeKey, PropertyKind};
use crate::core::tensors::Tensor;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Archive row {row} is malformed: {reason}")]
    BadRow { row: usize, reason: String },
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("CSV error: {source}")]
    Csv {
        #[from]
        source: csv::Error,
    },
}

/// On-disk row of the contributions archive.
#[derive(Debug, Serialize, Deserialize)]
struct ArchiveRow {
    property: String,
    kind: String,
    electrical: u8,
    mechanical: u8,
    frequency: String,
    status: String,
    needed: String,
    component: String,
    value: Option<f64>,
}

fn status_of(result: &ContributionResult) -> &'static str {
    match result {
        ContributionResult::Computed { flagged: false, .. } => "computed",
        ContributionResult::Computed { flagged: true, .. } => "flagged",
        ContributionResult::Unavailable { .. } => "unavailable",
    }
}

/// Writes the collection as CSV, preserving entry order.
pub fn write_to(
    data: &VibrationalContributionsData,
    writer: &mut impl Write,
) -> Result<(), ArchiveError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for entry in data.iter() {
        let base = |component: String, value: Option<f64>| ArchiveRow {
            property: entry.id.property.to_string(),
            kind: entry.id.kind.to_string(),
            electrical: entry.id.electrical,
            mechanical: entry.id.mechanical,
            frequency: entry.frequency.to_string(),
            status: status_of(&entry.result).to_string(),
            needed: entry
                .required
                .iter()
                .map(|key| key.to_string())
                .collect::<Vec<_>>()
                .join(";"),
            component,
            value,
        };
        match &entry.result {
            ContributionResult::Computed { tensor, .. } => {
                let key = entry.id.property.base_key();
                for component in key.all_components(0) {
                    let value = tensor
                        .get(&component)
                        .expect("contribution tensor matches its property shape");
                    csv_writer.serialize(base(
                        component
                            .iter()
                            .map(|i| i.to_string())
                            .collect::<Vec<_>>()
                            .join(":"),
                        Some(value),
                    ))?;
                }
            }
            ContributionResult::Unavailable { missing } => {
                let missing_list = missing
                    .iter()
                    .map(|key| key.to_string())
                    .collect::<Vec<_>>()
                    .join(";");
                csv_writer.serialize(base(format!("missing={}", missing_list), None))?;
            }
        }
    }
    csv_writer.flush()?;
    Ok(())
}

/// Reads a collection previously produced by [`write_to`]; entries come back
/// in file order.
pub fn read_from(reader: &mut impl Read) -> Result<VibrationalContributionsData, ArchiveError> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut data = VibrationalContributionsData::new();
    // rows of one computed entry are contiguous; collect until the identity
    // changes
    let mut current: Option<(VibrationalContribution, Tensor)> = None;

    let mut flush =
        |pending: &mut Option<(VibrationalContribution, Tensor)>,
         data: &mut VibrationalContributionsData|
         -> Result<(), ArchiveError> {
            if let Some((mut entry, tensor)) = pending.take() {
                if let ContributionResult::Computed { tensor: slot, .. } = &mut entry.result {
                    *slot = tensor;
                }
                data.add_contribution(entry, false)
                    .map_err(|e| ArchiveError::BadRow {
                        row: 0,
                        reason: e.to_string(),
                    })?;
            }
            Ok(())
        };

    for (index, result) in csv_reader.deserialize::<ArchiveRow>().enumerate() {
        let row_number = index + 2;
        let row = result?;
        let bad_row = |reason: &str| ArchiveError::BadRow {
            row: row_number,
            reason: reason.to_string(),
        };

        let property: PropertyKind = row.property.parse().map_err(|_| bad_row("property"))?;
        let kind = match row.kind.as_str() {
            "zpva" => ContributionKind::Zpva,
            "pv" => ContributionKind::PureVibrational,
            _ => return Err(bad_row("kind")),
        };
        let id = ContributionId {
            property,
            kind,
            electrical: row.electrical,
            mechanical: row.mechanical,
        };
        let frequency: Frequency = row.frequency.parse().map_err(|_| bad_row("frequency"))?;
        let required = parse_key_list(&row.needed).map_err(|_| bad_row("needed"))?;

        match row.status.as_str() {
            "unavailable" => {
                flush(&mut current, &mut data)?;
                let missing = row
                    .component
                    .strip_prefix("missing=")
                    .ok_or_else(|| bad_row("component"))
                    .and_then(|list| parse_key_list(list).map_err(|_| bad_row("component")))?;
                data.add_contribution(
                    VibrationalContribution {
                        id,
                        frequency,
                        required,
                        result: ContributionResult::Unavailable { missing },
                    },
                    false,
                )
                .map_err(|e| ArchiveError::BadRow {
                    row: row_number,
                    reason: e.to_string(),
                })?;
            }
            status @ ("computed" | "flagged") => {
                let matches_current = current
                    .as_ref()
                    .is_some_and(|(entry, _)| entry.id == id && entry.frequency == frequency);
                if !matches_current {
                    flush(&mut current, &mut data)?;
                    let shape = property.base_key().shape(0);
                    current = Some((
                        VibrationalContribution {
                            id,
                            frequency,
                            required,
                            result: ContributionResult::Computed {
                                tensor: Tensor::zeros(&shape),
                                flagged: status == "flagged",
                            },
                        },
                        Tensor::zeros(&shape),
                    ));
                }
                let (_, tensor) = current.as_mut().expect("entry was just created");
                let component = if row.component.is_empty() {
                    Vec::new()
                } else {
                    row.component
                        .split(':')
                        .map(|part| part.parse::<usize>())
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|_| bad_row("component"))?
                };
                let value = row.value.ok_or_else(|| bad_row("value"))?;
                tensor
                    .set(&component, value)
                    .map_err(|_| bad_row("component"))?;
            }
            _ => return Err(bad_row("status")),
        }
    }
    flush(&mut current, &mut data)?;
    Ok(data)
}

fn parse_key_list(list: &str) -> Result<Vec<DerivativeKey>, ()> {
    if list.is_empty() {
        return Ok(Vec::new());
    }
    list.split(';').map(|part| part.parse().map_err(|_| ())).collect()
}

pub fn write_to_path<P: AsRef<Path>>(
    data: &VibrationalContributionsData,
    path: P,
) -> Result<(), ArchiveError> {
    let file = std::fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);
    write_to(data, &mut writer)
}

pub fn read_from_path<P: AsRef<Path>>(path: P) -> Result<VibrationalContributionsData, ArchiveError> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    read_from(&mut reader)
}
