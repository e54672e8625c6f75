//! The result of an acquisition: waveforms keyed by source, in request order.

use std::collections::BTreeMap;
use std::io::Read;
use std::ops::Index;

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};

use crate::error::{Result, ScopeError};
use crate::waveform::{decode, Waveform, WaveformHeader};

// The scope writes at most this many header rows before the column labels
const SPREADSHEET_HEADER_ROWS: usize = 21;

/// A source that was requested but left out of a best-effort acquisition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedSource {
    pub source: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WaveformSet {
    idn: String,
    waveforms: Vec<(String, Waveform)>,
    header: BTreeMap<String, String>,
    skipped: Vec<SkippedSource>,
}

impl WaveformSet {
    pub fn new<S: Into<String>>(idn: S) -> Self {
        Self {
            idn: idn.into(),
            ..Self::default()
        }
    }

    /// Identification string of the instrument the data came from.
    pub fn idn(&self) -> &str {
        &self.idn
    }

    /// Sources present, in the order they were acquired.
    pub fn sources(&self) -> Vec<&str> {
        self.waveforms.iter().map(|(s, _)| s.as_str()).collect()
    }

    /// Raw preamble fields; later acquisitions overwrite keys of earlier ones.
    pub fn header(&self) -> &BTreeMap<String, String> {
        &self.header
    }

    pub fn skipped(&self) -> &[SkippedSource] {
        &self.skipped
    }

    pub fn get(&self, source: &str) -> Result<&Waveform> {
        self.waveforms
            .iter()
            .find(|(s, _)| s.eq_ignore_ascii_case(source))
            .map(|(_, w)| w)
            .ok_or_else(|| ScopeError::NotFound(source.to_owned()))
    }

    pub fn contains(&self, source: &str) -> bool {
        self.get(source).is_ok()
    }

    pub fn len(&self) -> usize {
        self.waveforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waveforms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Waveform)> {
        self.waveforms.iter().map(|(s, w)| (s.as_str(), w))
    }

    /// Add or replace the waveform of `source`. A replaced source keeps its position.
    pub fn insert<S: Into<String>>(&mut self, source: S, waveform: Waveform) {
        let source = source.into();
        match self.waveforms.iter_mut().find(|(s, _)| *s == source) {
            Some(entry) => entry.1 = waveform,
            None => self.waveforms.push((source, waveform)),
        }
    }

    pub fn update_header<I: IntoIterator<Item = (String, String)>>(&mut self, fields: I) {
        self.header.extend(fields);
    }

    pub fn skip<S: Into<String>>(&mut self, source: S, reason: &ScopeError) {
        self.skipped.push(SkippedSource {
            source: source.into(),
            reason: reason.to_string(),
        });
    }

    /// Fold `other` into this set. Both must come from the same instrument.
    pub fn merge(&mut self, other: WaveformSet) -> Result<()> {
        if self.idn != other.idn {
            return Err(ScopeError::Incompatible {
                left: self.idn.clone(),
                right: other.idn,
            });
        }
        self.header.extend(other.header);
        for (source, waveform) in other.waveforms {
            self.insert(source, waveform);
        }
        self.skipped.extend(other.skipped);
        Ok(())
    }

    /// Parse the CSV a scope writes for `SAVE:WAVEFORM:FILEFORMAT SPREADSHEET`.
    ///
    /// Leading `key,value` rows form the header, a `Label` row ends it, the next row names the
    /// columns (e.g. `TIME,CH1`) and every remaining row holds one value per column.
    pub fn from_spreadsheet<R: Read>(rdr: R) -> Result<Self> {
        let mut csv_rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(rdr);
        let mut records = csv_rdr.records();

        let mut header = BTreeMap::new();
        let mut found_label = false;
        for record in records.by_ref().take(SPREADSHEET_HEADER_ROWS) {
            let record = record?;
            if record.get(0) == Some("Label") {
                found_label = true;
                break;
            }
            if record.len() == 2 && !record[0].is_empty() {
                header.insert(record[0].to_owned(), record[1].to_owned());
            }
        }
        if !found_label {
            return Err(ScopeError::decode("Spreadsheet has no Label row"));
        }

        let labels: Vec<String> = match records.next() {
            Some(record) => record?.iter().map(|s| s.to_owned()).collect(),
            None => return Err(ScopeError::decode("Spreadsheet ends before the column labels")),
        };

        let mut columns: Vec<Vec<f64>> = vec![Vec::new(); labels.len()];
        for (row, record) in records.enumerate() {
            let record = record?;
            if record.len() != labels.len() {
                return Err(ScopeError::decode(format!(
                    "Data row {} has {} columns, expected {}",
                    row + 1,
                    record.len(),
                    labels.len()
                )));
            }
            for (column, field) in columns.iter_mut().zip(record.iter()) {
                let value = field
                    .parse::<f64>()
                    .map_err(|_| ScopeError::decode(format!("Data row {}: {:?} is not a number", row + 1, field)))?;
                column.push(value);
            }
        }

        let x_increment = header
            .get("Sample Interval")
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);
        // The TIME column carries the real time origin, e.g. a negative pretrigger time
        let x_zero = labels
            .iter()
            .position(|l| l.eq_ignore_ascii_case("TIME"))
            .and_then(|i| columns[i].first().copied())
            .unwrap_or(0.0);

        let mut set = WaveformSet::new("");
        for (label, values) in labels.into_iter().zip(columns) {
            let wf_header = WaveformHeader::identity(values.len()).with_timing(x_increment, x_zero, 0.0);
            set.insert(label, decode(&values, &wf_header)?);
        }
        set.header = header;
        Ok(set)
    }
}

impl Index<&str> for WaveformSet {
    type Output = Waveform;

    /// Prefer [`WaveformSet::get`], which reports a missing source as [`ScopeError::NotFound`].
    /// Indexing is a shorthand for when the source is known to be present and panics otherwise.
    fn index(&self, source: &str) -> &Waveform {
        match self.get(source) {
            Ok(w) => w,
            Err(_) => panic!("no waveform for source {:?}, have {:?}", source, self.sources()),
        }
    }
}

// Waveforms serialize as a map so the JSON keeps request order and reads like `data["CH1"]`
struct OrderedWaveforms<'a>(&'a [(String, Waveform)]);

impl Serialize for OrderedWaveforms<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (source, waveform) in self.0 {
            map.serialize_entry(source, waveform)?;
        }
        map.end()
    }
}

impl Serialize for WaveformSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("WaveformSet", 4)?;
        s.serialize_field("idn", &self.idn)?;
        s.serialize_field("sources", &self.sources())?;
        s.serialize_field("header", &self.header)?;
        s.serialize_field("waveforms", &OrderedWaveforms(&self.waveforms))?;
        if !self.skipped.is_empty() {
            s.serialize_field("skipped", &self.skipped)?;
        }
        s.end()
    }
}
