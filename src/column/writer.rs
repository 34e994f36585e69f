use super::{open_encoder, to_raw, ColumnReader, Datum, ValueEncoder};
use crate::encoding::bitpack::{bits_required, BitPackedEncoder};
use crate::error::{Error, Result};
use crate::format::{ColumnConfig, PageIndexEntryType};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

/// Buffers the three streams of one column until the table is committed.
pub struct ColumnWriter {
    config: ColumnConfig,
    rlevels: BitPackedEncoder,
    dlevels: BitPackedEncoder,
    values: Box<dyn ValueEncoder>,
    num_entries: u64,
}

impl ColumnWriter {
    pub fn new(config: ColumnConfig) -> Self {
        Self {
            rlevels: BitPackedEncoder::with_width(bits_required(config.rlevel_max)),
            dlevels: BitPackedEncoder::with_width(bits_required(config.dlevel_max)),
            values: open_encoder(config.storage_type),
            num_entries: 0,
            config,
        }
    }

    /// Starts from the committed contents of a column, for writers that
    /// append to an existing table.
    pub(crate) fn from_reader(config: ColumnConfig, reader: &mut ColumnReader) -> Result<Self> {
        let mut writer = Self::new(config);
        while let Some(entry) = reader.next()? {
            writer.add_datum(entry.rlevel, entry.dlevel, entry.value)?;
        }
        Ok(writer)
    }

    pub fn config(&self) -> &ColumnConfig {
        &self.config
    }

    pub fn column_name(&self) -> &str {
        &self.config.column_name
    }

    pub fn rlevel_max(&self) -> u64 {
        self.config.rlevel_max
    }

    pub fn dlevel_max(&self) -> u64 {
        self.config.dlevel_max
    }

    /// Number of (rlevel, dlevel) pairs written, nulls included.
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Number of defined values.
    pub fn num_values(&self) -> u64 {
        self.values.len()
    }

    pub fn add_datum(&mut self, rlevel: u64, dlevel: u64, value: Option<Datum>) -> Result<()> {
        if rlevel > self.config.rlevel_max {
            return Err(Error::Runtime(format!(
                "rlevel {} exceeds max {} of column '{}'",
                rlevel, self.config.rlevel_max, self.config.column_name
            )));
        }
        if dlevel > self.config.dlevel_max {
            return Err(Error::Runtime(format!(
                "dlevel {} exceeds max {} of column '{}'",
                dlevel, self.config.dlevel_max, self.config.column_name
            )));
        }

        let defined = dlevel == self.config.dlevel_max;
        match (defined, value) {
            (true, Some(value)) => {
                let raw = to_raw(value, self.config.logical_type)?;
                self.values.encode(&raw)?;
            }
            (false, None) => {}
            (true, None) => {
                return Err(Error::IllegalState(format!(
                    "column '{}' needs a value at dlevel {}",
                    self.config.column_name, dlevel
                )))
            }
            (false, Some(_)) => {
                return Err(Error::IllegalState(format!(
                    "column '{}' can't store a value at dlevel {} (max {})",
                    self.config.column_name, dlevel, self.config.dlevel_max
                )))
            }
        }

        if self.config.rlevel_max > 0 {
            self.rlevels.push(rlevel)?;
        }
        if self.config.dlevel_max > 0 {
            self.dlevels.push(dlevel)?;
        }
        self.num_entries += 1;
        Ok(())
    }

    pub fn write_null(&mut self, rlevel: u64, dlevel: u64) -> Result<()> {
        self.add_datum(rlevel, dlevel, None)
    }

    pub fn write_bool(&mut self, rlevel: u64, dlevel: u64, value: bool) -> Result<()> {
        self.add_datum(rlevel, dlevel, Some(Datum::Bool(value)))
    }

    pub fn write_uint(&mut self, rlevel: u64, dlevel: u64, value: u64) -> Result<()> {
        self.add_datum(rlevel, dlevel, Some(Datum::UInt(value)))
    }

    pub fn write_int(&mut self, rlevel: u64, dlevel: u64, value: i64) -> Result<()> {
        self.add_datum(rlevel, dlevel, Some(Datum::Int(value)))
    }

    pub fn write_float(&mut self, rlevel: u64, dlevel: u64, value: f64) -> Result<()> {
        self.add_datum(rlevel, dlevel, Some(Datum::Float(value)))
    }

    pub fn write_string(&mut self, rlevel: u64, dlevel: u64, value: &str) -> Result<()> {
        self.add_datum(rlevel, dlevel, Some(Datum::Str(value.as_bytes().to_vec())))
    }

    /// Page contents keyed by stream type. Streams without entries yield
    /// empty buffers, which the page manager stores as "no page".
    pub fn streams(&self) -> [(PageIndexEntryType, Vec<u8>); 3] {
        let empty = self.num_entries == 0;
        let data = if self.values.len() > 0 {
            self.values.finish()
        } else {
            Vec::new()
        };
        let rlevels = if !empty && self.config.rlevel_max > 0 {
            self.rlevels.finish()
        } else {
            Vec::new()
        };
        let dlevels = if !empty && self.config.dlevel_max > 0 {
            self.dlevels.finish()
        } else {
            Vec::new()
        };

        [
            (PageIndexEntryType::Data, data),
            (PageIndexEntryType::RLevel, rlevels),
            (PageIndexEntryType::DLevel, dlevels),
        ]
    }

    /// v0.1.0 column body: both level stream lengths, then the three streams.
    pub fn write_v1_body<W: Write>(&self, writer: &mut W) -> Result<u64> {
        let [(_, data), (_, rlevels), (_, dlevels)] = self.streams();
        writer.write_u64::<LittleEndian>(rlevels.len() as u64)?;
        writer.write_u64::<LittleEndian>(dlevels.len() as u64)?;
        writer.write_all(&rlevels)?;
        writer.write_all(&dlevels)?;
        writer.write_all(&data)?;
        Ok(16 + (rlevels.len() + dlevels.len() + data.len()) as u64)
    }
}
