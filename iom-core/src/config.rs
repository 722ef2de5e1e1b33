//! Typed views over the binary IOM configuration blob.
//!
//! The blob is a single contiguous, offset-addressed image produced offline:
//! a header locating ten tables by byte offset and count, the tables
//! themselves, and a string table for port names. All fields are in the
//! target's native byte order (payload byte-order conversion happens at
//! signal access, never on the configuration).
//!
//! [`Config::parse`] walks every table once, validating offsets, counts and
//! record sizes; after that, access is by indexed decode over the validated
//! slice with no further checking on the hot path.
//!
//! The [`build`] submodule writes blobs in the same layout for the simulator
//! and the test suites.

use crate::types::{
    IomError, RawValue, Result, A429_MAX_PORTS, A429_MAX_SDI, MAX_NUMBER_OF_SELECTION_SETS,
    MAX_RX_PORT_NUMBER, MAX_SOURCES_PER_INPUT, MAX_TX_PORT_NUMBER,
};

pub const CONFIG_MAGIC: u32 = 0xC919_DDCF;

pub const HEADER_SIZE: usize = 112;
pub const AFDX_MESSAGE_INFO_SIZE: usize = 56;
pub const A429_PORT_INFO_SIZE: usize = 20;
pub const A429_MESSAGE_INFO_SIZE: usize = 12;
pub const CAN_MESSAGE_CONFIG_SIZE: usize = 20;
pub const INPUT_DATASET_HEADER_SIZE: usize = 12;
pub const VALIDITY_CONDITION_SIZE: usize = 40;
pub const VALIDITY_CONFIG_SIZE: usize = 8 + 4 * VALIDITY_CONDITION_SIZE;
pub const VALIDITY_CONFIG_CAN_SIZE: usize = 8 + 2 * VALIDITY_CONDITION_SIZE;
pub const PARAM_MAPPING_SIZE: usize = 28;
pub const INPUT_SIGNAL_SIZE: usize = 28;
pub const LIC_PARAM_SIZE: usize = 20;
pub const SELECTION_SET_CONFIG_SIZE: usize = 24;
pub const SET_LIST_HEADER_SIZE: usize = 8;
pub const OUTPUT_DATASET_SIZE: usize = 28;
pub const SIMPLE_MAP_SIZE: usize = PARAM_MAPPING_SIZE + INPUT_SIGNAL_SIZE;
pub const CAN_INPUT_MAP_SIZE: usize = SIMPLE_MAP_SIZE + VALIDITY_CONFIG_CAN_SIZE;
pub const CAN_OUTPUT_MAP_SIZE: usize = SIMPLE_MAP_SIZE + INPUT_SIGNAL_SIZE;

// ---------------------------------------------------------------------------
// Native-order field readers
// ---------------------------------------------------------------------------

fn nu16(b: &[u8], off: usize) -> u16 {
    u16::from_ne_bytes([b[off], b[off + 1]])
}

fn nu32(b: &[u8], off: usize) -> u32 {
    u32::from_ne_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

fn nf32(b: &[u8], off: usize) -> f32 {
    f32::from_bits(nu32(b, off))
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Decoded configuration header. Offsets are bytes from the blob start.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigHeader {
    pub magic: u32,
    pub total_size: u32,
    pub afdx_input_message_start: u32,
    pub afdx_input_message_count: u32,
    pub afdx_input_dataset_start: u32,
    pub afdx_input_dataset_count: u32,
    pub afdx_input_dataset_multi_start: u32,
    pub afdx_input_dataset_multi_count: u32,
    pub afdx_output_message_start: u32,
    pub afdx_output_message_count: u32,
    pub afdx_output_dataset_start: u32,
    pub afdx_output_dataset_count: u32,
    pub can_input_message_start: u32,
    pub can_input_message_count: u32,
    pub can_output_message_start: u32,
    pub can_output_message_count: u32,
    pub a429_input_port_start: u32,
    pub a429_input_port_count: u32,
    pub a429_input_message_start: u32,
    pub a429_input_message_count: u32,
    pub dio_input_message_start: u32,
    pub dio_input_message_count: u32,
    pub dio_output_message_start: u32,
    pub dio_output_message_count: u32,
    pub selection_set_start: u32,
    pub selection_set_size: u32,
    pub string_table_start: u32,
    pub string_table_size: u32,
}

impl ConfigHeader {
    fn decode(b: &[u8]) -> ConfigHeader {
        let f = |i: usize| nu32(b, i * 4);
        ConfigHeader {
            magic: f(0),
            total_size: f(1),
            afdx_input_message_start: f(2),
            afdx_input_message_count: f(3),
            afdx_input_dataset_start: f(4),
            afdx_input_dataset_count: f(5),
            afdx_input_dataset_multi_start: f(6),
            afdx_input_dataset_multi_count: f(7),
            afdx_output_message_start: f(8),
            afdx_output_message_count: f(9),
            afdx_output_dataset_start: f(10),
            afdx_output_dataset_count: f(11),
            can_input_message_start: f(12),
            can_input_message_count: f(13),
            can_output_message_start: f(14),
            can_output_message_count: f(15),
            a429_input_port_start: f(16),
            a429_input_port_count: f(17),
            a429_input_message_start: f(18),
            a429_input_message_count: f(19),
            dio_input_message_start: f(20),
            dio_input_message_count: f(21),
            dio_output_message_start: f(22),
            dio_output_message_count: f(23),
            selection_set_start: f(24),
            selection_set_size: f(25),
            string_table_start: f(26),
            string_table_size: f(27),
        }
    }
}

// ---------------------------------------------------------------------------
// Record types
// ---------------------------------------------------------------------------

/// AFDX message description (input or output table).
#[derive(Debug, Clone, Copy, Default)]
pub struct AfdxMessageInfo {
    pub message_id: u32,
    pub message_length: u32,
    /// Queue length; 0 means sampling port.
    pub queue_length: u32,
    pub refresh_period: u32,
    pub valid_time: u32,
    pub invalid_time: u32,
    pub message_hdr_offset: u32,
    pub port_name_offset: u32,
    pub crc_fsb_offset: u32,
    pub crc_offset: u32,
    pub fc_fsb_offset: u32,
    pub fc_offset: u32,
    pub sched_offset: u32,
    pub sched_rate: u32,
}

impl AfdxMessageInfo {
    fn decode(b: &[u8], off: usize) -> Self {
        let f = |i: usize| nu32(b, off + i * 4);
        AfdxMessageInfo {
            message_id: f(0),
            message_length: f(1),
            queue_length: f(2),
            refresh_period: f(3),
            valid_time: f(4),
            invalid_time: f(5),
            message_hdr_offset: f(6),
            port_name_offset: f(7),
            crc_fsb_offset: f(8),
            crc_offset: f(9),
            fc_fsb_offset: f(10),
            fc_offset: f(11),
            sched_offset: f(12),
            sched_rate: f(13),
        }
    }
}

/// A429 physical receive port.
#[derive(Debug, Clone, Copy, Default)]
pub struct A429PortInfo {
    pub port_id: u32,
    pub message_length: u32,
    pub queue_length: u32,
    /// Offset of this port's raw-data region in the input message buffer.
    pub message_offset: u32,
    pub port_name_offset: u32,
}

impl A429PortInfo {
    fn decode(b: &[u8], off: usize) -> Self {
        let f = |i: usize| nu32(b, off + i * 4);
        A429PortInfo {
            port_id: f(0),
            message_length: f(1),
            queue_length: f(2),
            message_offset: f(3),
            port_name_offset: f(4),
        }
    }
}

/// A429 label configuration (one per `(port, label, sdi)`).
#[derive(Debug, Clone, Copy, Default)]
pub struct A429MessageInfo {
    /// Label code in binary, e.g. octal 271 = 0xB9.
    pub code: u8,
    pub sdi: u8,
    pub port: u8,
    pub valid_time: u32,
    pub invalid_time: u32,
}

impl A429MessageInfo {
    fn decode(b: &[u8], off: usize) -> Self {
        A429MessageInfo {
            code: b[off],
            sdi: b[off + 1],
            port: b[off + 2],
            valid_time: nu32(b, off + 4),
            invalid_time: nu32(b, off + 8),
        }
    }
}

/// CAN message description. Mapping records follow the struct inline;
/// `size` covers the struct plus its mappings and chains to the next message.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanMessageConfig {
    pub message_id: u32,
    pub can_id: u32,
    pub fresh_time: u32,
    pub unfresh_time: u32,
    pub size: u16,
    pub message_length: u8,
    pub num_mappings: u8,
}

impl CanMessageConfig {
    fn decode(b: &[u8], off: usize) -> Self {
        CanMessageConfig {
            message_id: nu32(b, off),
            can_id: nu32(b, off + 4),
            fresh_time: nu32(b, off + 8),
            unfresh_time: nu32(b, off + 12),
            size: nu16(b, off + 16),
            message_length: b[off + 18],
            num_mappings: b[off + 19],
        }
    }
}

/// One validity-check condition.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidityConditionConfig {
    pub msg_idx: u16,
    pub transport: u16,
    pub offset: u32,
    pub offset2: u32,
    pub offset3: u32,
    /// Access width of the checked field in bytes (1, 2 or 4).
    pub access: u32,
    pub size_bits: u32,
    pub off_bits: u32,
    pub lsb_value: f32,
    pub min_value: RawValue,
    pub max_value: RawValue,
}

impl ValidityConditionConfig {
    fn decode(b: &[u8], off: usize) -> Self {
        ValidityConditionConfig {
            msg_idx: nu16(b, off),
            transport: nu16(b, off + 2),
            offset: nu32(b, off + 4),
            offset2: nu32(b, off + 8),
            offset3: nu32(b, off + 12),
            access: nu32(b, off + 16),
            size_bits: nu32(b, off + 20),
            off_bits: nu32(b, off + 24),
            lsb_value: nf32(b, off + 28),
            min_value: RawValue(nu32(b, off + 32)),
            max_value: RawValue(nu32(b, off + 36)),
        }
    }
}

/// Validity logic of one source: up to 4 conditions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidityConfig {
    pub num_conditions: u16,
    /// Selection set this source belongs to.
    pub source_set: u16,
    pub condition_kind: [u8; 4],
    pub condition: [ValidityConditionConfig; 4],
}

impl ValidityConfig {
    fn decode(b: &[u8], off: usize) -> Self {
        let mut condition = [ValidityConditionConfig::default(); 4];
        for (i, c) in condition.iter_mut().enumerate() {
            *c = ValidityConditionConfig::decode(b, off + 8 + i * VALIDITY_CONDITION_SIZE);
        }
        ValidityConfig {
            num_conditions: nu16(b, off),
            source_set: nu16(b, off + 2),
            condition_kind: [b[off + 4], b[off + 5], b[off + 6], b[off + 7]],
            condition,
        }
    }
}

/// Validity logic of one CAN input mapping: up to 2 conditions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidityConfigCan {
    pub num_conditions: u16,
    pub condition_kind: [u8; 4],
    pub condition: [ValidityConditionConfig; 2],
}

impl ValidityConfigCan {
    fn decode(b: &[u8], off: usize) -> Self {
        ValidityConfigCan {
            num_conditions: nu16(b, off),
            condition_kind: [b[off + 4], b[off + 5], b[off + 6], b[off + 7]],
            condition: [
                ValidityConditionConfig::decode(b, off + 8),
                ValidityConditionConfig::decode(b, off + 8 + VALIDITY_CONDITION_SIZE),
            ],
        }
    }
}

/// Application-side placement of one parameter. `num_sources` inline
/// [`InputSignalConfig`] records follow the struct.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParamMappingConfig {
    pub par_offset: u32,
    pub val_offset: u32,
    /// Parameter size in bits.
    pub par_size: u32,
    pub num_sources: u16,
    pub par_name_offset: u32,
    pub val_name_offset: u32,
    pub default_value: RawValue,
}

impl ParamMappingConfig {
    fn decode(b: &[u8], off: usize) -> Self {
        ParamMappingConfig {
            par_offset: nu32(b, off),
            val_offset: nu32(b, off + 4),
            par_size: nu32(b, off + 8),
            num_sources: nu16(b, off + 12),
            par_name_offset: nu32(b, off + 16),
            val_name_offset: nu32(b, off + 20),
            default_value: RawValue(nu32(b, off + 24)),
        }
    }

    /// Size of this mapping record plus its inline signal configs.
    pub fn record_size(&self) -> usize {
        PARAM_MAPPING_SIZE + self.num_sources as usize * INPUT_SIGNAL_SIZE
    }
}

/// Wire-side description of one input signal for one source.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputSignalConfig {
    pub msg_idx: u16,
    pub transport: u16,
    pub off_byte: u32,
    pub size_bits: u32,
    pub off_bits: u16,
    /// Converter kind (input or output table, depending on context).
    pub kind: u16,
    pub lsb_value: f32,
    /// Placement in the per-source parameter buffer.
    pub par_offset: u32,
    pub val_offset: u32,
}

impl InputSignalConfig {
    fn decode(b: &[u8], off: usize) -> Self {
        InputSignalConfig {
            msg_idx: nu16(b, off),
            transport: nu16(b, off + 2),
            off_byte: nu32(b, off + 4),
            size_bits: nu32(b, off + 8),
            off_bits: nu16(b, off + 12),
            kind: nu16(b, off + 14),
            lsb_value: nf32(b, off + 16),
            par_offset: nu32(b, off + 20),
            val_offset: nu32(b, off + 24),
        }
    }
}

/// Dataset header: one or more parameters under one functional status.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputDatasetHeader {
    pub num_sources: u16,
    pub num_params: u16,
    pub logic_size: u32,
    pub dataset_size: u32,
}

impl InputDatasetHeader {
    fn decode(b: &[u8], off: usize) -> Self {
        InputDatasetHeader {
            num_sources: nu16(b, off),
            num_params: nu16(b, off + 2),
            logic_size: nu32(b, off + 4),
            dataset_size: nu32(b, off + 8),
        }
    }
}

/// Mode for checking an LIC parameter value.
pub const LIC_VALUE_ANY: u32 = 0;
pub const LIC_VALUE_EXACT: u32 = 1;

/// One source of an LIC_PARAMETER selection set.
#[derive(Debug, Clone, Copy, Default)]
pub struct LicParamConfig {
    pub value_mode: u32,
    pub value_exp: u32,
    pub val_offset: u32,
    pub par_offset: u32,
    pub par_kind: u32,
}

impl LicParamConfig {
    fn decode(b: &[u8], off: usize) -> Self {
        let f = |i: usize| nu32(b, off + i * 4);
        LicParamConfig {
            value_mode: f(0),
            value_exp: f(1),
            val_offset: f(2),
            par_offset: f(3),
            par_kind: f(4),
        }
    }
}

/// Source-selection policy of a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionCriteria {
    One,
    LicParameter,
    HealthScore,
    ObjectValid,
}

impl SelectionCriteria {
    pub fn from_u32(v: u32) -> SelectionCriteria {
        match v {
            1 => SelectionCriteria::LicParameter,
            2 => SelectionCriteria::HealthScore,
            3 => SelectionCriteria::ObjectValid,
            _ => SelectionCriteria::One,
        }
    }
}

/// Selection set configuration. The source records live at `source_offset`
/// (bytes from blob start); `set_config_size` chains to the next set.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionSetConfig {
    pub nof_sources: u32,
    pub criteria: u32,
    pub source_health_mode: u32,
    /// Lock time in milliseconds.
    pub source_health_value: u32,
    pub source_offset: u32,
    pub set_config_size: u32,
}

impl SelectionSetConfig {
    fn decode(b: &[u8], off: usize) -> Self {
        let f = |i: usize| nu32(b, off + i * 4);
        SelectionSetConfig {
            nof_sources: f(0),
            criteria: f(1),
            source_health_mode: f(2),
            source_health_value: f(3),
            source_offset: f(4),
            set_config_size: f(5),
        }
    }

    pub fn criteria(&self) -> SelectionCriteria {
        SelectionCriteria::from_u32(self.criteria)
    }
}

/// Output dataset type.
pub const OUTPUT_DS_A664: u32 = 0;
pub const OUTPUT_DS_EMBEDDED_A429: u32 = 1;

/// SSM kind for embedded A429 output labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsmType {
    None,
    Bnr,
    Bcd,
    Dis,
}

impl SsmType {
    pub fn from_u32(v: u32) -> SsmType {
        match v {
            1 => SsmType::Bnr,
            2 => SsmType::Bcd,
            3 => SsmType::Dis,
            _ => SsmType::None,
        }
    }
}

/// Output dataset: mappings under one functional status byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputDatasetConfig {
    pub kind: u32,
    pub size: u32,
    /// Offset of the functional status byte in the output message buffer.
    pub fs_offset: u32,
    /// Offset of the dataset (the embedded A429 word for that type).
    pub ds_offset: u32,
    pub num_mappings: u32,
    /// Embedded A429: label + SDI already in wire position.
    pub a429_label_id_sdi: u32,
    pub a429_ssm_type: u32,
}

impl OutputDatasetConfig {
    fn decode(b: &[u8], off: usize) -> Self {
        let f = |i: usize| nu32(b, off + i * 4);
        OutputDatasetConfig {
            kind: f(0),
            size: f(1),
            fs_offset: f(2),
            ds_offset: f(3),
            num_mappings: f(4),
            a429_label_id_sdi: f(5),
            a429_ssm_type: f(6),
        }
    }
}

// ---------------------------------------------------------------------------
// Display unit personality
// ---------------------------------------------------------------------------

/// Display Unit identity reported by the platform, selecting one of five
/// configuration personalities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayUnit {
    LeftOutboard,
    LeftInboard,
    RightInboard,
    RightOutboard,
    Center,
    Invalid,
}

impl DisplayUnit {
    pub fn from_id(id: i32) -> DisplayUnit {
        match id {
            1 => DisplayUnit::LeftOutboard,
            2 => DisplayUnit::LeftInboard,
            3 => DisplayUnit::RightInboard,
            4 => DisplayUnit::RightOutboard,
            5 => DisplayUnit::Center,
            _ => DisplayUnit::Invalid,
        }
    }

    /// Index into the five-personality blob set; the invalid identity falls
    /// back to left-outboard.
    pub fn personality_index(self) -> usize {
        match self {
            DisplayUnit::LeftOutboard | DisplayUnit::Invalid => 0,
            DisplayUnit::LeftInboard => 1,
            DisplayUnit::RightInboard => 2,
            DisplayUnit::RightOutboard => 3,
            DisplayUnit::Center => 4,
        }
    }
}

// ---------------------------------------------------------------------------
// Config view
// ---------------------------------------------------------------------------

/// Validated view over a configuration blob.
#[derive(Debug, Clone, Copy)]
pub struct Config<'a> {
    bytes: &'a [u8],
    pub header: ConfigHeader,
}

/// Buffer space the runtime must provide, derived from the configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferSizes {
    pub in_msg: usize,
    pub in_param: usize,
    pub out_msg: usize,
}

impl<'a> Config<'a> {
    /// Parse and validate a blob: magic, table bounds, record-size chains and
    /// count ceilings are all checked here, once.
    pub fn parse(bytes: &'a [u8]) -> Result<Config<'a>> {
        need(bytes, "config header", 0, HEADER_SIZE)?;
        let header = ConfigHeader::decode(bytes);
        if header.magic != CONFIG_MAGIC {
            return Err(IomError::BadMagic(header.magic));
        }
        let cfg = Config { bytes, header };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Pick and parse the personality for the given display unit out of the
    /// five blobs. An unparseable selection degrades to the left-outboard
    /// default rather than aborting.
    pub fn select(du: DisplayUnit, blobs: [&'a [u8]; 5]) -> Result<Config<'a>> {
        match Config::parse(blobs[du.personality_index()]) {
            Ok(cfg) => Ok(cfg),
            Err(_) => Config::parse(blobs[0]),
        }
    }

    fn validate(&self) -> Result<()> {
        let h = &self.header;
        let b = self.bytes;

        if h.total_size as usize > b.len() {
            return Err(IomError::Truncated {
                what: "config image",
                offset: 0,
                needed: h.total_size as usize,
                available: b.len(),
            });
        }

        check_count("afdx input messages", h.afdx_input_message_count, MAX_RX_PORT_NUMBER)?;
        check_count("afdx output messages", h.afdx_output_message_count, MAX_TX_PORT_NUMBER)?;
        check_count("a429 ports", h.a429_input_port_count, A429_MAX_PORTS)?;

        need(
            b,
            "afdx input message table",
            h.afdx_input_message_start as usize,
            h.afdx_input_message_count as usize * AFDX_MESSAGE_INFO_SIZE,
        )?;
        need(
            b,
            "afdx output message table",
            h.afdx_output_message_start as usize,
            h.afdx_output_message_count as usize * AFDX_MESSAGE_INFO_SIZE,
        )?;
        need(
            b,
            "a429 port table",
            h.a429_input_port_start as usize,
            h.a429_input_port_count as usize * A429_PORT_INFO_SIZE,
        )?;
        need(
            b,
            "a429 message table",
            h.a429_input_message_start as usize,
            h.a429_input_message_count as usize * A429_MESSAGE_INFO_SIZE,
        )?;
        for msg in self.a429_messages() {
            if msg.port as u32 >= h.a429_input_port_count || msg.sdi as usize >= A429_MAX_SDI {
                return Err(IomError::UnknownKind {
                    what: "a429 label port/sdi",
                    value: msg.port as u32,
                });
            }
        }

        self.validate_datasets(h.afdx_input_dataset_start, h.afdx_input_dataset_count)?;
        self.validate_datasets(h.afdx_input_dataset_multi_start, h.afdx_input_dataset_multi_count)?;
        self.validate_can_chain(h.can_input_message_start, h.can_input_message_count, CAN_INPUT_MAP_SIZE)?;
        self.validate_can_chain(h.can_output_message_start, h.can_output_message_count, CAN_OUTPUT_MAP_SIZE)?;
        self.validate_output_datasets()?;
        self.validate_selection_sets()?;

        need(b, "string table", h.string_table_start as usize, h.string_table_size as usize)?;
        Ok(())
    }

    fn validate_datasets(&self, start: u32, count: u32) -> Result<()> {
        let b = self.bytes;
        let mut off = start as usize;
        for _ in 0..count {
            need(b, "input dataset", off, INPUT_DATASET_HEADER_SIZE)?;
            let ds = InputDatasetHeader::decode(b, off);
            need(b, "input dataset body", off, ds.dataset_size as usize)?;
            check_count("dataset sources", ds.num_sources as u32, MAX_SOURCES_PER_INPUT)?;
            if (ds.logic_size as usize) < ds.num_sources as usize * VALIDITY_CONFIG_SIZE {
                return Err(IomError::Truncated {
                    what: "dataset validity logic",
                    offset: off,
                    needed: ds.num_sources as usize * VALIDITY_CONFIG_SIZE,
                    available: ds.logic_size as usize,
                });
            }
            let mut par_off = off + INPUT_DATASET_HEADER_SIZE + ds.logic_size as usize;
            for _ in 0..ds.num_params {
                need(b, "param mapping", par_off, PARAM_MAPPING_SIZE)?;
                let par = ParamMappingConfig::decode(b, par_off);
                need(b, "param signal configs", par_off, par.record_size())?;
                par_off += par.record_size();
            }
            off += ds.dataset_size as usize;
        }
        Ok(())
    }

    fn validate_can_chain(&self, start: u32, count: u32, map_size: usize) -> Result<()> {
        let b = self.bytes;
        let mut off = start as usize;
        for _ in 0..count {
            need(b, "can message config", off, CAN_MESSAGE_CONFIG_SIZE)?;
            let cfg = CanMessageConfig::decode(b, off);
            let body = CAN_MESSAGE_CONFIG_SIZE + cfg.num_mappings as usize * map_size;
            if (cfg.size as usize) < body {
                return Err(IomError::Truncated {
                    what: "can message mappings",
                    offset: off,
                    needed: body,
                    available: cfg.size as usize,
                });
            }
            need(b, "can message body", off, cfg.size as usize)?;
            off += cfg.size as usize;
        }
        Ok(())
    }

    fn validate_output_datasets(&self) -> Result<()> {
        let b = self.bytes;
        let mut off = self.header.afdx_output_dataset_start as usize;
        for _ in 0..self.header.afdx_output_dataset_count {
            need(b, "output dataset", off, OUTPUT_DATASET_SIZE)?;
            let ds = OutputDatasetConfig::decode(b, off);
            let body = OUTPUT_DATASET_SIZE + ds.num_mappings as usize * SIMPLE_MAP_SIZE;
            if (ds.size as usize) < body {
                return Err(IomError::Truncated {
                    what: "output dataset mappings",
                    offset: off,
                    needed: body,
                    available: ds.size as usize,
                });
            }
            need(b, "output dataset body", off, ds.size as usize)?;
            off += ds.size as usize;
        }
        Ok(())
    }

    fn validate_selection_sets(&self) -> Result<()> {
        let b = self.bytes;
        let start = self.header.selection_set_start as usize;
        if self.header.selection_set_size == 0 {
            return Ok(());
        }
        need(b, "selection set list", start, SET_LIST_HEADER_SIZE)?;
        let nof_sets = nu32(b, start);
        check_count("selection sets", nof_sets, MAX_NUMBER_OF_SELECTION_SETS)?;
        let mut off = nu32(b, start + 4) as usize;
        for _ in 0..nof_sets {
            need(b, "selection set config", off, SELECTION_SET_CONFIG_SIZE)?;
            let set = SelectionSetConfig::decode(b, off);
            check_count("set sources", set.nof_sources, MAX_SOURCES_PER_INPUT)?;
            let source_size = match set.criteria() {
                SelectionCriteria::LicParameter => LIC_PARAM_SIZE,
                SelectionCriteria::ObjectValid => VALIDITY_CONFIG_SIZE,
                _ => 0,
            };
            need(
                b,
                "selection set sources",
                set.source_offset as usize,
                set.nof_sources as usize * source_size,
            )?;
            if (set.set_config_size as usize) < SELECTION_SET_CONFIG_SIZE {
                return Err(IomError::Truncated {
                    what: "selection set chain",
                    offset: off,
                    needed: SELECTION_SET_CONFIG_SIZE,
                    available: set.set_config_size as usize,
                });
            }
            off += set.set_config_size as usize;
        }
        Ok(())
    }

    // -- fixed tables -------------------------------------------------------

    pub fn afdx_input_count(&self) -> usize {
        self.header.afdx_input_message_count as usize
    }

    pub fn afdx_input_message(&self, idx: usize) -> AfdxMessageInfo {
        AfdxMessageInfo::decode(
            self.bytes,
            self.header.afdx_input_message_start as usize + idx * AFDX_MESSAGE_INFO_SIZE,
        )
    }

    pub fn afdx_input_messages(&self) -> impl Iterator<Item = AfdxMessageInfo> + '_ {
        (0..self.afdx_input_count()).map(move |i| self.afdx_input_message(i))
    }

    pub fn afdx_output_count(&self) -> usize {
        self.header.afdx_output_message_count as usize
    }

    pub fn afdx_output_message(&self, idx: usize) -> AfdxMessageInfo {
        AfdxMessageInfo::decode(
            self.bytes,
            self.header.afdx_output_message_start as usize + idx * AFDX_MESSAGE_INFO_SIZE,
        )
    }

    pub fn afdx_output_messages(&self) -> impl Iterator<Item = AfdxMessageInfo> + '_ {
        (0..self.afdx_output_count()).map(move |i| self.afdx_output_message(i))
    }

    pub fn a429_port_count(&self) -> usize {
        self.header.a429_input_port_count as usize
    }

    pub fn a429_port(&self, idx: usize) -> A429PortInfo {
        A429PortInfo::decode(
            self.bytes,
            self.header.a429_input_port_start as usize + idx * A429_PORT_INFO_SIZE,
        )
    }

    pub fn a429_message_count(&self) -> usize {
        self.header.a429_input_message_count as usize
    }

    pub fn a429_message(&self, idx: usize) -> A429MessageInfo {
        A429MessageInfo::decode(
            self.bytes,
            self.header.a429_input_message_start as usize + idx * A429_MESSAGE_INFO_SIZE,
        )
    }

    pub fn a429_messages(&self) -> impl Iterator<Item = A429MessageInfo> + '_ {
        (0..self.a429_message_count()).map(move |i| self.a429_message(i))
    }

    // -- datasets -----------------------------------------------------------

    pub fn input_datasets_single(&self) -> DatasetIter<'a> {
        DatasetIter {
            blob: self.bytes,
            off: self.header.afdx_input_dataset_start as usize,
            remaining: self.header.afdx_input_dataset_count as usize,
        }
    }

    pub fn input_datasets_multi(&self) -> DatasetIter<'a> {
        DatasetIter {
            blob: self.bytes,
            off: self.header.afdx_input_dataset_multi_start as usize,
            remaining: self.header.afdx_input_dataset_multi_count as usize,
        }
    }

    // -- CAN ----------------------------------------------------------------

    pub fn can_input_messages(&self) -> CanMessageIter<'a> {
        CanMessageIter {
            blob: self.bytes,
            off: self.header.can_input_message_start as usize,
            remaining: self.header.can_input_message_count as usize,
        }
    }

    pub fn can_output_messages(&self) -> CanMessageIter<'a> {
        CanMessageIter {
            blob: self.bytes,
            off: self.header.can_output_message_start as usize,
            remaining: self.header.can_output_message_count as usize,
        }
    }

    /// Re-materialise a CAN message view from a blob offset recorded earlier.
    pub fn can_message_at(&self, offset: usize) -> CanMessageRef<'a> {
        CanMessageRef {
            blob: self.bytes,
            offset,
            config: CanMessageConfig::decode(self.bytes, offset),
        }
    }

    // -- selection sets -----------------------------------------------------

    pub fn selection_set_count(&self) -> usize {
        if self.header.selection_set_size == 0 {
            return 0;
        }
        nu32(self.bytes, self.header.selection_set_start as usize) as usize
    }

    pub fn selection_sets(&self) -> SelectionSetIter<'a> {
        let (off, remaining) = if self.header.selection_set_size == 0 {
            (0, 0)
        } else {
            let start = self.header.selection_set_start as usize;
            (nu32(self.bytes, start + 4) as usize, self.selection_set_count())
        };
        SelectionSetIter {
            blob: self.bytes,
            off,
            index: 0,
            remaining,
        }
    }

    // -- output datasets ----------------------------------------------------

    pub fn output_datasets(&self) -> OutputDatasetIter<'a> {
        OutputDatasetIter {
            blob: self.bytes,
            off: self.header.afdx_output_dataset_start as usize,
            remaining: self.header.afdx_output_dataset_count as usize,
        }
    }

    // -- strings ------------------------------------------------------------

    /// NUL-terminated name from the string table.
    pub fn string_at(&self, offset: u32) -> &'a str {
        let start = self.header.string_table_start as usize + offset as usize;
        let end = self.bytes[start..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| start + p)
            .unwrap_or(self.bytes.len());
        std::str::from_utf8(&self.bytes[start..end]).unwrap_or("")
    }

    /// Valid/invalid confirmation windows of the message feeding a signal,
    /// keyed by transport (A429 labels carry their own windows).
    pub fn source_windows(&self, transport: u16, msg_idx: u16) -> (u32, u32) {
        if crate::types::Transport::from_u16(transport) == crate::types::Transport::A429 {
            if (msg_idx as usize) < self.a429_message_count() {
                let m = self.a429_message(msg_idx as usize);
                return (m.valid_time, m.invalid_time);
            }
        } else if (msg_idx as usize) < self.afdx_input_count() {
            let m = self.afdx_input_message(msg_idx as usize);
            return (m.valid_time, m.invalid_time);
        }
        (0, 0)
    }

    // -- buffer sizing ------------------------------------------------------

    /// Walk the configuration and derive how much buffer space the runtime
    /// needs. `afdx_header_len` is the in-band header size (32 + extra pad).
    pub fn buffer_sizes(&self, afdx_header_len: usize) -> BufferSizes {
        let mut sizes = BufferSizes::default();

        for msg in self.afdx_input_messages() {
            let end = msg.message_hdr_offset as usize + afdx_header_len + msg.message_length as usize;
            sizes.in_msg = sizes.in_msg.max(end);
        }
        for i in 0..self.a429_port_count() {
            let port = self.a429_port(i);
            let end = port.message_offset as usize + crate::types::A429_MAX_LABELS * A429_MAX_SDI * 8;
            sizes.in_msg = sizes.in_msg.max(end);
        }
        for msg in self.afdx_output_messages() {
            let end = msg.message_hdr_offset as usize + msg.message_length as usize;
            sizes.out_msg = sizes.out_msg.max(end);
        }
        for ds in self.output_datasets() {
            sizes.out_msg = sizes
                .out_msg
                .max(ds.config.fs_offset as usize + 1)
                .max(ds.config.ds_offset as usize + 4);
            for map in ds.maps() {
                sizes.out_msg = sizes.out_msg.max(map.signal.off_byte as usize + 8);
            }
        }

        for ds in self.input_datasets_single().chain(self.input_datasets_multi()) {
            for par in ds.params() {
                track_param(&mut sizes, &par.mapping);
                for s in 0..par.mapping.num_sources as usize {
                    track_signal(&mut sizes, &par.signal(s));
                }
            }
        }
        for msg in self.can_input_messages() {
            for map in msg.input_mappings() {
                track_param(&mut sizes, &map.mapping);
                track_signal(&mut sizes, &map.signal);
            }
        }

        sizes
    }
}

fn track_param(sizes: &mut BufferSizes, par: &ParamMappingConfig) {
    sizes.in_param = sizes
        .in_param
        .max(par.par_offset as usize + (par.par_size as usize / 8).max(1))
        .max(par.val_offset as usize + 4);
}

fn track_signal(sizes: &mut BufferSizes, sig: &InputSignalConfig) {
    sizes.in_param = sizes
        .in_param
        .max(sig.par_offset as usize + (sig.size_bits as usize / 8).max(8))
        .max(sig.val_offset as usize + 4);
}

fn need(b: &[u8], what: &'static str, offset: usize, size: usize) -> Result<()> {
    if offset.checked_add(size).map_or(true, |end| end > b.len()) {
        return Err(IomError::Truncated {
            what,
            offset,
            needed: size,
            available: b.len().saturating_sub(offset),
        });
    }
    Ok(())
}

fn check_count(what: &'static str, count: u32, max: usize) -> Result<()> {
    if count as usize > max {
        return Err(IomError::TableOverflow {
            what,
            count: count as usize,
            max,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Iterators / views
// ---------------------------------------------------------------------------

/// Iterator over variable-size input datasets.
pub struct DatasetIter<'a> {
    blob: &'a [u8],
    off: usize,
    remaining: usize,
}

impl<'a> Iterator for DatasetIter<'a> {
    type Item = DatasetRef<'a>;

    fn next(&mut self) -> Option<DatasetRef<'a>> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let header = InputDatasetHeader::decode(self.blob, self.off);
        let ds = DatasetRef {
            blob: self.blob,
            off: self.off,
            header,
        };
        self.off += header.dataset_size as usize;
        Some(ds)
    }
}

/// View of one input dataset.
#[derive(Clone, Copy)]
pub struct DatasetRef<'a> {
    blob: &'a [u8],
    off: usize,
    pub header: InputDatasetHeader,
}

impl<'a> DatasetRef<'a> {
    /// Validity logic of the given source (logic records follow the header).
    pub fn validity_logic(&self, source: usize) -> ValidityConfig {
        ValidityConfig::decode(
            self.blob,
            self.off + INPUT_DATASET_HEADER_SIZE + source * VALIDITY_CONFIG_SIZE,
        )
    }

    pub fn params(&self) -> ParamIter<'a> {
        ParamIter {
            blob: self.blob,
            off: self.off + INPUT_DATASET_HEADER_SIZE + self.header.logic_size as usize,
            remaining: self.header.num_params as usize,
        }
    }
}

/// Iterator over the parameter mappings of a dataset.
pub struct ParamIter<'a> {
    blob: &'a [u8],
    off: usize,
    remaining: usize,
}

impl<'a> Iterator for ParamIter<'a> {
    type Item = ParamRef<'a>;

    fn next(&mut self) -> Option<ParamRef<'a>> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let mapping = ParamMappingConfig::decode(self.blob, self.off);
        let par = ParamRef {
            blob: self.blob,
            off: self.off,
            mapping,
        };
        self.off += mapping.record_size();
        Some(par)
    }
}

/// One parameter mapping plus its inline per-source signal configs.
#[derive(Clone, Copy)]
pub struct ParamRef<'a> {
    blob: &'a [u8],
    off: usize,
    pub mapping: ParamMappingConfig,
}

impl ParamRef<'_> {
    pub fn signal(&self, source: usize) -> InputSignalConfig {
        InputSignalConfig::decode(
            self.blob,
            self.off + PARAM_MAPPING_SIZE + source * INPUT_SIGNAL_SIZE,
        )
    }
}

/// Iterator over a size-chained CAN message table.
pub struct CanMessageIter<'a> {
    blob: &'a [u8],
    off: usize,
    remaining: usize,
}

impl<'a> Iterator for CanMessageIter<'a> {
    type Item = CanMessageRef<'a>;

    fn next(&mut self) -> Option<CanMessageRef<'a>> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let config = CanMessageConfig::decode(self.blob, self.off);
        let msg = CanMessageRef {
            blob: self.blob,
            offset: self.off,
            config,
        };
        self.off += config.size as usize;
        Some(msg)
    }
}

/// View of one CAN message and its mappings.
#[derive(Clone, Copy)]
pub struct CanMessageRef<'a> {
    blob: &'a [u8],
    pub offset: usize,
    pub config: CanMessageConfig,
}

/// One CAN input mapping: parameter, signal, and inline validity logic.
#[derive(Debug, Clone, Copy)]
pub struct CanInputMap {
    pub mapping: ParamMappingConfig,
    pub signal: InputSignalConfig,
    pub validity: ValidityConfigCan,
}

/// One CAN output mapping; the second signal config encodes the parameter's
/// validity when `mapping.num_sources == 2`.
#[derive(Debug, Clone, Copy)]
pub struct CanOutputMap {
    pub mapping: ParamMappingConfig,
    pub signal: InputSignalConfig,
    pub validity_signal: InputSignalConfig,
}

impl<'a> CanMessageRef<'a> {
    pub fn input_mappings(&self) -> impl Iterator<Item = CanInputMap> + 'a {
        let blob = self.blob;
        let base = self.offset + CAN_MESSAGE_CONFIG_SIZE;
        (0..self.config.num_mappings as usize).map(move |i| {
            let off = base + i * CAN_INPUT_MAP_SIZE;
            CanInputMap {
                mapping: ParamMappingConfig::decode(blob, off),
                signal: InputSignalConfig::decode(blob, off + PARAM_MAPPING_SIZE),
                validity: ValidityConfigCan::decode(blob, off + SIMPLE_MAP_SIZE),
            }
        })
    }

    pub fn output_mappings(&self) -> impl Iterator<Item = CanOutputMap> + 'a {
        let blob = self.blob;
        let base = self.offset + CAN_MESSAGE_CONFIG_SIZE;
        (0..self.config.num_mappings as usize).map(move |i| {
            let off = base + i * CAN_OUTPUT_MAP_SIZE;
            CanOutputMap {
                mapping: ParamMappingConfig::decode(blob, off),
                signal: InputSignalConfig::decode(blob, off + PARAM_MAPPING_SIZE),
                validity_signal: InputSignalConfig::decode(blob, off + SIMPLE_MAP_SIZE),
            }
        })
    }
}

/// Iterator over selection sets.
pub struct SelectionSetIter<'a> {
    blob: &'a [u8],
    off: usize,
    index: usize,
    remaining: usize,
}

impl<'a> Iterator for SelectionSetIter<'a> {
    type Item = SelectionSetRef<'a>;

    fn next(&mut self) -> Option<SelectionSetRef<'a>> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let config = SelectionSetConfig::decode(self.blob, self.off);
        let set = SelectionSetRef {
            blob: self.blob,
            index: self.index,
            config,
        };
        self.index += 1;
        self.off += config.set_config_size as usize;
        Some(set)
    }
}

/// View of one selection set and its criterion-specific source records.
#[derive(Clone, Copy)]
pub struct SelectionSetRef<'a> {
    blob: &'a [u8],
    pub index: usize,
    pub config: SelectionSetConfig,
}

impl SelectionSetRef<'_> {
    pub fn lic_param(&self, source: usize) -> LicParamConfig {
        LicParamConfig::decode(
            self.blob,
            self.config.source_offset as usize + source * LIC_PARAM_SIZE,
        )
    }

    pub fn validity_logic(&self, source: usize) -> ValidityConfig {
        ValidityConfig::decode(
            self.blob,
            self.config.source_offset as usize + source * VALIDITY_CONFIG_SIZE,
        )
    }
}

/// Iterator over output datasets.
pub struct OutputDatasetIter<'a> {
    blob: &'a [u8],
    off: usize,
    remaining: usize,
}

impl<'a> Iterator for OutputDatasetIter<'a> {
    type Item = OutputDatasetRef<'a>;

    fn next(&mut self) -> Option<OutputDatasetRef<'a>> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let config = OutputDatasetConfig::decode(self.blob, self.off);
        let ds = OutputDatasetRef {
            blob: self.blob,
            off: self.off,
            config,
        };
        self.off += config.size as usize;
        Some(ds)
    }
}

/// One parameter-to-signal map of an output dataset.
#[derive(Debug, Clone, Copy)]
pub struct SimpleMap {
    pub mapping: ParamMappingConfig,
    pub signal: InputSignalConfig,
}

/// View of one output dataset.
#[derive(Clone, Copy)]
pub struct OutputDatasetRef<'a> {
    blob: &'a [u8],
    off: usize,
    pub config: OutputDatasetConfig,
}

impl<'a> OutputDatasetRef<'a> {
    pub fn maps(&self) -> impl Iterator<Item = SimpleMap> + 'a {
        let blob = self.blob;
        let base = self.off + OUTPUT_DATASET_SIZE;
        (0..self.config.num_mappings as usize).map(move |i| {
            let off = base + i * SIMPLE_MAP_SIZE;
            SimpleMap {
                mapping: ParamMappingConfig::decode(blob, off),
                signal: InputSignalConfig::decode(blob, off + PARAM_MAPPING_SIZE),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub mod build {
    //! Programmatic blob writer, emitting the exact on-disk layout the parser
    //! consumes. Used by the simulator's demo configuration and the test
    //! suites; the production blob comes from the offline generator.

    use super::*;

    #[derive(Default)]
    pub struct DatasetDef {
        pub sources: Vec<ValidityConfig>,
        pub params: Vec<ParamDef>,
    }

    pub struct ParamDef {
        pub mapping: ParamMappingConfig,
        pub signals: Vec<InputSignalConfig>,
    }

    pub struct CanInMapDef {
        pub mapping: ParamMappingConfig,
        pub signal: InputSignalConfig,
        pub validity: ValidityConfigCan,
    }

    pub struct CanOutMapDef {
        pub mapping: ParamMappingConfig,
        pub signal: InputSignalConfig,
        pub validity_signal: InputSignalConfig,
    }

    pub struct CanInMsgDef {
        pub config: CanMessageConfig,
        pub maps: Vec<CanInMapDef>,
    }

    pub struct CanOutMsgDef {
        pub config: CanMessageConfig,
        pub maps: Vec<CanOutMapDef>,
    }

    pub enum SetSourcesDef {
        Lic(Vec<LicParamConfig>),
        Validity(Vec<ValidityConfig>),
    }

    pub struct SelectionSetDef {
        pub criteria: SelectionCriteria,
        pub health_mode: u32,
        pub health_value_ms: u32,
        pub sources: SetSourcesDef,
    }

    pub struct OutputDatasetDef {
        pub kind: u32,
        pub fs_offset: u32,
        pub ds_offset: u32,
        pub a429_label_id_sdi: u32,
        pub a429_ssm_type: u32,
        pub maps: Vec<(ParamMappingConfig, InputSignalConfig)>,
    }

    /// Accumulates tables and assembles the blob.
    #[derive(Default)]
    pub struct ConfigBuilder {
        afdx_in: Vec<(AfdxMessageInfo, String)>,
        afdx_out: Vec<(AfdxMessageInfo, String)>,
        datasets_single: Vec<DatasetDef>,
        datasets_multi: Vec<DatasetDef>,
        can_in: Vec<CanInMsgDef>,
        can_out: Vec<CanOutMsgDef>,
        a429_ports: Vec<(A429PortInfo, String)>,
        a429_msgs: Vec<A429MessageInfo>,
        sets: Vec<SelectionSetDef>,
        out_datasets: Vec<OutputDatasetDef>,
        strings: Vec<u8>,
    }

    impl ConfigBuilder {
        pub fn new() -> ConfigBuilder {
            ConfigBuilder::default()
        }

        pub fn afdx_input(&mut self, info: AfdxMessageInfo, port_name: &str) -> &mut Self {
            self.afdx_in.push((info, port_name.to_string()));
            self
        }

        pub fn afdx_output(&mut self, info: AfdxMessageInfo, port_name: &str) -> &mut Self {
            self.afdx_out.push((info, port_name.to_string()));
            self
        }

        pub fn dataset_single(&mut self, ds: DatasetDef) -> &mut Self {
            self.datasets_single.push(ds);
            self
        }

        pub fn dataset_multi(&mut self, ds: DatasetDef) -> &mut Self {
            self.datasets_multi.push(ds);
            self
        }

        pub fn can_input(&mut self, msg: CanInMsgDef) -> &mut Self {
            self.can_in.push(msg);
            self
        }

        pub fn can_output(&mut self, msg: CanOutMsgDef) -> &mut Self {
            self.can_out.push(msg);
            self
        }

        pub fn a429_port(&mut self, info: A429PortInfo, port_name: &str) -> &mut Self {
            self.a429_ports.push((info, port_name.to_string()));
            self
        }

        pub fn a429_message(&mut self, info: A429MessageInfo) -> &mut Self {
            self.a429_msgs.push(info);
            self
        }

        pub fn selection_set(&mut self, set: SelectionSetDef) -> &mut Self {
            self.sets.push(set);
            self
        }

        pub fn output_dataset(&mut self, ds: OutputDatasetDef) -> &mut Self {
            self.out_datasets.push(ds);
            self
        }

        fn intern(&mut self, name: &str) -> u32 {
            let off = self.strings.len() as u32;
            self.strings.extend_from_slice(name.as_bytes());
            self.strings.push(0);
            off
        }

        /// Assemble the blob.
        pub fn finish(mut self) -> Vec<u8> {
            let mut out = vec![0u8; HEADER_SIZE];
            let mut header = [0u32; HEADER_SIZE / 4];
            header[0] = CONFIG_MAGIC;

            // AFDX input messages
            header[2] = out.len() as u32;
            header[3] = self.afdx_in.len() as u32;
            let afdx_in = std::mem::take(&mut self.afdx_in);
            for (mut info, name) in afdx_in {
                info.port_name_offset = self.intern(&name);
                encode_afdx(&info, &mut out);
            }

            // Single-source datasets
            header[4] = out.len() as u32;
            header[5] = self.datasets_single.len() as u32;
            for ds in std::mem::take(&mut self.datasets_single) {
                encode_dataset(&ds, &mut out);
            }

            // Multi-source datasets
            header[6] = out.len() as u32;
            header[7] = self.datasets_multi.len() as u32;
            for ds in std::mem::take(&mut self.datasets_multi) {
                encode_dataset(&ds, &mut out);
            }

            // AFDX output messages
            header[8] = out.len() as u32;
            header[9] = self.afdx_out.len() as u32;
            let afdx_out = std::mem::take(&mut self.afdx_out);
            for (mut info, name) in afdx_out {
                info.port_name_offset = self.intern(&name);
                encode_afdx(&info, &mut out);
            }

            // AFDX output datasets
            header[10] = out.len() as u32;
            header[11] = self.out_datasets.len() as u32;
            for ds in std::mem::take(&mut self.out_datasets) {
                encode_output_dataset(&ds, &mut out);
            }

            // CAN input messages
            header[12] = out.len() as u32;
            header[13] = self.can_in.len() as u32;
            for msg in std::mem::take(&mut self.can_in) {
                encode_can_in(&msg, &mut out);
            }

            // CAN output messages
            header[14] = out.len() as u32;
            header[15] = self.can_out.len() as u32;
            for msg in std::mem::take(&mut self.can_out) {
                encode_can_out(&msg, &mut out);
            }

            // A429 ports
            header[16] = out.len() as u32;
            header[17] = self.a429_ports.len() as u32;
            let ports = std::mem::take(&mut self.a429_ports);
            for (mut info, name) in ports {
                info.port_name_offset = self.intern(&name);
                for v in [
                    info.port_id,
                    info.message_length,
                    info.queue_length,
                    info.message_offset,
                    info.port_name_offset,
                ] {
                    put_u32(&mut out, v);
                }
            }

            // A429 messages
            header[18] = out.len() as u32;
            header[19] = self.a429_msgs.len() as u32;
            for msg in std::mem::take(&mut self.a429_msgs) {
                out.extend_from_slice(&[msg.code, msg.sdi, msg.port, 0]);
                put_u32(&mut out, msg.valid_time);
                put_u32(&mut out, msg.invalid_time);
            }

            // Selection sets: list header, then set configs, with the source
            // records of each set placed immediately after its config.
            header[24] = out.len() as u32;
            let list_start = out.len();
            put_u32(&mut out, self.sets.len() as u32);
            let next_offset = (out.len() + 4) as u32;
            put_u32(&mut out, next_offset);
            for set in std::mem::take(&mut self.sets) {
                encode_selection_set(&set, &mut out);
            }
            header[25] = (out.len() - list_start) as u32;

            // String table
            header[26] = out.len() as u32;
            header[27] = self.strings.len() as u32;
            out.extend_from_slice(&self.strings);

            header[1] = out.len() as u32;
            for (i, v) in header.iter().enumerate() {
                out[i * 4..i * 4 + 4].copy_from_slice(&v.to_ne_bytes());
            }
            out
        }
    }

    fn put_u16(out: &mut Vec<u8>, v: u16) {
        out.extend_from_slice(&v.to_ne_bytes());
    }

    fn put_u32(out: &mut Vec<u8>, v: u32) {
        out.extend_from_slice(&v.to_ne_bytes());
    }

    fn encode_afdx(info: &AfdxMessageInfo, out: &mut Vec<u8>) {
        for v in [
            info.message_id,
            info.message_length,
            info.queue_length,
            info.refresh_period,
            info.valid_time,
            info.invalid_time,
            info.message_hdr_offset,
            info.port_name_offset,
            info.crc_fsb_offset,
            info.crc_offset,
            info.fc_fsb_offset,
            info.fc_offset,
            info.sched_offset,
            info.sched_rate,
        ] {
            put_u32(out, v);
        }
    }

    fn encode_condition(c: &ValidityConditionConfig, out: &mut Vec<u8>) {
        put_u16(out, c.msg_idx);
        put_u16(out, c.transport);
        put_u32(out, c.offset);
        put_u32(out, c.offset2);
        put_u32(out, c.offset3);
        put_u32(out, c.access);
        put_u32(out, c.size_bits);
        put_u32(out, c.off_bits);
        put_u32(out, c.lsb_value.to_bits());
        put_u32(out, c.min_value.0);
        put_u32(out, c.max_value.0);
    }

    fn encode_validity(v: &ValidityConfig, out: &mut Vec<u8>) {
        put_u16(out, v.num_conditions);
        put_u16(out, v.source_set);
        out.extend_from_slice(&v.condition_kind);
        for c in &v.condition {
            encode_condition(c, out);
        }
    }

    fn encode_validity_can(v: &ValidityConfigCan, out: &mut Vec<u8>) {
        put_u16(out, v.num_conditions);
        put_u16(out, 0);
        out.extend_from_slice(&v.condition_kind);
        for c in &v.condition {
            encode_condition(c, out);
        }
    }

    fn encode_mapping(p: &ParamMappingConfig, num_sources: u16, out: &mut Vec<u8>) {
        put_u32(out, p.par_offset);
        put_u32(out, p.val_offset);
        put_u32(out, p.par_size);
        put_u16(out, num_sources);
        put_u16(out, 0);
        put_u32(out, p.par_name_offset);
        put_u32(out, p.val_name_offset);
        put_u32(out, p.default_value.0);
    }

    fn encode_signal(s: &InputSignalConfig, out: &mut Vec<u8>) {
        put_u16(out, s.msg_idx);
        put_u16(out, s.transport);
        put_u32(out, s.off_byte);
        put_u32(out, s.size_bits);
        put_u16(out, s.off_bits);
        put_u16(out, s.kind);
        put_u32(out, s.lsb_value.to_bits());
        put_u32(out, s.par_offset);
        put_u32(out, s.val_offset);
    }

    fn encode_dataset(ds: &DatasetDef, out: &mut Vec<u8>) {
        let logic_size = ds.sources.len() * VALIDITY_CONFIG_SIZE;
        let params_size: usize = ds
            .params
            .iter()
            .map(|p| PARAM_MAPPING_SIZE + p.signals.len() * INPUT_SIGNAL_SIZE)
            .sum();
        let dataset_size = INPUT_DATASET_HEADER_SIZE + logic_size + params_size;

        put_u16(out, ds.sources.len() as u16);
        put_u16(out, ds.params.len() as u16);
        put_u32(out, logic_size as u32);
        put_u32(out, dataset_size as u32);
        for v in &ds.sources {
            encode_validity(v, out);
        }
        for p in &ds.params {
            encode_mapping(&p.mapping, p.signals.len() as u16, out);
            for s in &p.signals {
                encode_signal(s, out);
            }
        }
    }

    fn encode_output_dataset(ds: &OutputDatasetDef, out: &mut Vec<u8>) {
        let size = OUTPUT_DATASET_SIZE + ds.maps.len() * SIMPLE_MAP_SIZE;
        put_u32(out, ds.kind);
        put_u32(out, size as u32);
        put_u32(out, ds.fs_offset);
        put_u32(out, ds.ds_offset);
        put_u32(out, ds.maps.len() as u32);
        put_u32(out, ds.a429_label_id_sdi);
        put_u32(out, ds.a429_ssm_type);
        for (mapping, signal) in &ds.maps {
            encode_mapping(mapping, mapping.num_sources, out);
            encode_signal(signal, out);
        }
    }

    fn encode_can_in(msg: &CanInMsgDef, out: &mut Vec<u8>) {
        let size = CAN_MESSAGE_CONFIG_SIZE + msg.maps.len() * CAN_INPUT_MAP_SIZE;
        put_u32(out, msg.config.message_id);
        put_u32(out, msg.config.can_id);
        put_u32(out, msg.config.fresh_time);
        put_u32(out, msg.config.unfresh_time);
        put_u16(out, size as u16);
        out.push(msg.config.message_length);
        out.push(msg.maps.len() as u8);
        for m in &msg.maps {
            encode_mapping(&m.mapping, m.mapping.num_sources, out);
            encode_signal(&m.signal, out);
            encode_validity_can(&m.validity, out);
        }
    }

    fn encode_can_out(msg: &CanOutMsgDef, out: &mut Vec<u8>) {
        let size = CAN_MESSAGE_CONFIG_SIZE + msg.maps.len() * CAN_OUTPUT_MAP_SIZE;
        put_u32(out, msg.config.message_id);
        put_u32(out, msg.config.can_id);
        put_u32(out, msg.config.fresh_time);
        put_u32(out, msg.config.unfresh_time);
        put_u16(out, size as u16);
        out.push(msg.config.message_length);
        out.push(msg.maps.len() as u8);
        for m in &msg.maps {
            encode_mapping(&m.mapping, m.mapping.num_sources, out);
            encode_signal(&m.signal, out);
            encode_signal(&m.validity_signal, out);
        }
    }

    fn encode_selection_set(set: &SelectionSetDef, out: &mut Vec<u8>) {
        let (nof_sources, sources_size) = match &set.sources {
            SetSourcesDef::Lic(v) => (v.len(), v.len() * LIC_PARAM_SIZE),
            SetSourcesDef::Validity(v) => (v.len(), v.len() * VALIDITY_CONFIG_SIZE),
        };
        let criteria = match set.criteria {
            SelectionCriteria::One => 0,
            SelectionCriteria::LicParameter => 1,
            SelectionCriteria::HealthScore => 2,
            SelectionCriteria::ObjectValid => 3,
        };
        let base = out.len();
        put_u32(out, nof_sources as u32);
        put_u32(out, criteria);
        put_u32(out, set.health_mode);
        put_u32(out, set.health_value_ms);
        put_u32(out, (base + SELECTION_SET_CONFIG_SIZE) as u32);
        put_u32(out, (SELECTION_SET_CONFIG_SIZE + sources_size) as u32);
        match &set.sources {
            SetSourcesDef::Lic(v) => {
                for lic in v {
                    for f in [
                        lic.value_mode,
                        lic.value_exp,
                        lic.val_offset,
                        lic.par_offset,
                        lic.par_kind,
                    ] {
                        put_u32(out, f);
                    }
                }
            }
            SetSourcesDef::Validity(v) => {
                for logic in v {
                    encode_validity(logic, out);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::build::*;
    use super::*;

    fn minimal_blob() -> Vec<u8> {
        let mut b = ConfigBuilder::new();
        b.afdx_input(
            AfdxMessageInfo {
                message_id: 7,
                message_length: 16,
                refresh_period: 16,
                valid_time: 32,
                invalid_time: 64,
                message_hdr_offset: 0,
                ..Default::default()
            },
            "AFDX_RX_DEMO",
        );
        b.dataset_single(DatasetDef {
            sources: vec![ValidityConfig {
                num_conditions: 1,
                source_set: 0,
                condition_kind: [0, 0, 0, 0],
                ..Default::default()
            }],
            params: vec![ParamDef {
                mapping: ParamMappingConfig {
                    par_offset: 0,
                    val_offset: 4,
                    par_size: 32,
                    num_sources: 1,
                    ..Default::default()
                },
                signals: vec![InputSignalConfig {
                    off_byte: 72,
                    size_bits: 32,
                    ..Default::default()
                }],
            }],
        });
        b.finish()
    }

    #[test]
    fn test_parse_roundtrip() {
        let blob = minimal_blob();
        let cfg = Config::parse(&blob).unwrap();

        assert_eq!(cfg.afdx_input_count(), 1);
        let msg = cfg.afdx_input_message(0);
        assert_eq!(msg.message_id, 7);
        assert_eq!(msg.invalid_time, 64);
        assert_eq!(cfg.string_at(msg.port_name_offset), "AFDX_RX_DEMO");

        let ds: Vec<_> = cfg.input_datasets_single().collect();
        assert_eq!(ds.len(), 1);
        assert_eq!(ds[0].header.num_sources, 1);
        assert_eq!(ds[0].header.num_params, 1);
        let par: Vec<_> = ds[0].params().collect();
        assert_eq!(par[0].mapping.val_offset, 4);
        assert_eq!(par[0].signal(0).off_byte, 72);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut blob = minimal_blob();
        blob[0] ^= 0xFF;
        assert!(matches!(Config::parse(&blob), Err(IomError::BadMagic(_))));
    }

    #[test]
    fn test_truncated_rejected() {
        let blob = minimal_blob();
        assert!(Config::parse(&blob[..HEADER_SIZE + 8]).is_err());
    }

    #[test]
    fn test_personality_fallback() {
        let good = minimal_blob();
        let mut bad = minimal_blob();
        bad[0] ^= 0xFF;
        // Center personality is corrupt: selection degrades to left-outboard.
        let cfg = Config::select(
            DisplayUnit::Center,
            [
                good.as_slice(),
                good.as_slice(),
                good.as_slice(),
                good.as_slice(),
                bad.as_slice(),
            ],
        )
        .unwrap();
        assert_eq!(cfg.afdx_input_count(), 1);
        assert_eq!(DisplayUnit::from_id(99), DisplayUnit::Invalid);
        assert_eq!(DisplayUnit::Invalid.personality_index(), 0);
    }

    #[test]
    fn test_selection_set_encoding() {
        let mut b = ConfigBuilder::new();
        b.selection_set(SelectionSetDef {
            criteria: SelectionCriteria::LicParameter,
            health_mode: 1,
            health_value_ms: 100,
            sources: SetSourcesDef::Lic(vec![
                LicParamConfig {
                    value_mode: LIC_VALUE_EXACT,
                    value_exp: 1,
                    val_offset: 4,
                    par_offset: 0,
                    par_kind: 0,
                },
                LicParamConfig {
                    value_mode: LIC_VALUE_EXACT,
                    value_exp: 1,
                    val_offset: 12,
                    par_offset: 8,
                    par_kind: 0,
                },
            ]),
        });
        let blob = b.finish();
        let cfg = Config::parse(&blob).unwrap();

        assert_eq!(cfg.selection_set_count(), 1);
        let sets: Vec<_> = cfg.selection_sets().collect();
        assert_eq!(sets[0].config.criteria(), SelectionCriteria::LicParameter);
        assert_eq!(sets[0].config.nof_sources, 2);
        assert_eq!(sets[0].lic_param(1).val_offset, 12);
    }

    #[test]
    fn test_buffer_sizes() {
        let blob = minimal_blob();
        let cfg = Config::parse(&blob).unwrap();
        let sizes = cfg.buffer_sizes(64);
        assert!(sizes.in_msg >= 64 + 16);
        assert!(sizes.in_param >= 8);
    }
}
