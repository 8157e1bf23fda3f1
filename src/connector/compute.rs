//! Compute definitions
//!
//! Columns are 1-based. Parameters documented as "value" accept either a literal or a `$n`
//! reference to another column of the same row.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

fn default_array_separator() -> String {
    String::from(",")
}

fn default_result_separator() -> String {
    String::from("|")
}

fn default_csv_separator() -> String {
    String::from(";")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Base64,
    Hex,
    Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Conversion {
    Hex2Decimal,
    Array2SimpleStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Compute {
    Replace {
        column: usize,
        existing_value: String,
        new_value: String,
    },
    Substring {
        column: usize,
        /// 1-based start, literal or `$n`
        start: String,
        length: String,
    },
    Extract {
        column: usize,
        sub_column: usize,
        sub_separators: String,
    },
    Translate {
        column: usize,
        translation_table: BTreeMap<String, String>,
    },
    PerBitTranslation {
        column: usize,
        /// comma separated bit positions, least significant bit is 0
        bit_list: String,
        /// keys are `"<bit>,<0|1>"`
        translation_table: BTreeMap<String, String>,
    },
    ArrayTranslate {
        column: usize,
        translation_table: BTreeMap<String, String>,
        #[serde(default = "default_array_separator")]
        array_separator: String,
        #[serde(default = "default_result_separator")]
        result_separator: String,
    },
    Decode {
        column: usize,
        encoding: Encoding,
    },
    Encode {
        column: usize,
        encoding: Encoding,
    },
    DuplicateColumn {
        column: usize,
    },
    ExcludeMatchingLines {
        column: usize,
        #[serde(default)]
        reg_exp: Option<String>,
        /// comma separated values
        #[serde(default)]
        value_list: Option<String>,
    },
    KeepOnlyMatchingLines {
        column: usize,
        #[serde(default)]
        reg_exp: Option<String>,
        #[serde(default)]
        value_list: Option<String>,
    },
    KeepColumns {
        /// comma separated column numbers
        column_numbers: String,
    },
    Append {
        column: usize,
        value: String,
    },
    Prepend {
        column: usize,
        value: String,
    },
    Add {
        column: usize,
        value: String,
    },
    Subtract {
        column: usize,
        value: String,
    },
    Multiply {
        column: usize,
        value: String,
    },
    Divide {
        column: usize,
        value: String,
    },
    And {
        column: usize,
        value: String,
    },
    Convert {
        column: usize,
        conversion: Conversion,
    },
    Json2Csv {
        /// `/` separated path to the array of records, empty for the root
        #[serde(default)]
        entry_key: String,
        /// `;` separated `/` paths read from every record
        properties: String,
        #[serde(default = "default_csv_separator")]
        separator: String,
    },
    Xml2Csv {
        record_tag: String,
        /// `;` separated child element names read from every record
        properties: String,
    },
    TableJoin {
        right_table: String,
        left_key_column: usize,
        right_key_column: usize,
        #[serde(default)]
        default_right_line: Option<String>,
    },
    TableUnion {
        tables: Vec<String>,
    },
}

impl Compute {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Compute::Replace { .. } => "replace",
            Compute::Substring { .. } => "substring",
            Compute::Extract { .. } => "extract",
            Compute::Translate { .. } => "translate",
            Compute::PerBitTranslation { .. } => "perBitTranslation",
            Compute::ArrayTranslate { .. } => "arrayTranslate",
            Compute::Decode { .. } => "decode",
            Compute::Encode { .. } => "encode",
            Compute::DuplicateColumn { .. } => "duplicateColumn",
            Compute::ExcludeMatchingLines { .. } => "excludeMatchingLines",
            Compute::KeepOnlyMatchingLines { .. } => "keepOnlyMatchingLines",
            Compute::KeepColumns { .. } => "keepColumns",
            Compute::Append { .. } => "append",
            Compute::Prepend { .. } => "prepend",
            Compute::Add { .. } => "add",
            Compute::Subtract { .. } => "subtract",
            Compute::Multiply { .. } => "multiply",
            Compute::Divide { .. } => "divide",
            Compute::And { .. } => "and",
            Compute::Convert { .. } => "convert",
            Compute::Json2Csv { .. } => "json2Csv",
            Compute::Xml2Csv { .. } => "xml2Csv",
            Compute::TableJoin { .. } => "tableJoin",
            Compute::TableUnion { .. } => "tableUnion",
        }
    }

    /// Whether the compute writes its own raw data next to the rows
    pub fn produces_raw_data(&self) -> bool {
        matches!(self, Compute::Json2Csv { .. } | Compute::Xml2Csv { .. })
    }

    /// Rewrites the free-text parameters (values, patterns, translations)
    pub fn update(&mut self, f: &dyn Fn(&str) -> String) {
        let apply = |s: &mut String| *s = f(s);
        let apply_opt = |s: &mut Option<String>| {
            if let Some(s) = s.as_mut() {
                *s = f(s);
            }
        };
        let apply_map = |table: &mut BTreeMap<String, String>| {
            table.values_mut().for_each(|v| *v = f(v));
        };

        match self {
            Compute::Replace {
                existing_value,
                new_value,
                ..
            } => {
                apply(existing_value);
                apply(new_value);
            }
            Compute::Substring { start, length, .. } => {
                apply(start);
                apply(length);
            }
            Compute::Translate {
                translation_table, ..
            }
            | Compute::PerBitTranslation {
                translation_table, ..
            }
            | Compute::ArrayTranslate {
                translation_table, ..
            } => apply_map(translation_table),
            Compute::ExcludeMatchingLines {
                reg_exp,
                value_list,
                ..
            }
            | Compute::KeepOnlyMatchingLines {
                reg_exp,
                value_list,
                ..
            } => {
                apply_opt(reg_exp);
                apply_opt(value_list);
            }
            Compute::Append { value, .. }
            | Compute::Prepend { value, .. }
            | Compute::Add { value, .. }
            | Compute::Subtract { value, .. }
            | Compute::Multiply { value, .. }
            | Compute::Divide { value, .. }
            | Compute::And { value, .. } => apply(value),
            Compute::TableJoin {
                default_right_line, ..
            } => apply_opt(default_right_line),
            Compute::Extract { .. }
            | Compute::Decode { .. }
            | Compute::Encode { .. }
            | Compute::DuplicateColumn { .. }
            | Compute::KeepColumns { .. }
            | Compute::Convert { .. }
            | Compute::Json2Csv { .. }
            | Compute::Xml2Csv { .. }
            | Compute::TableUnion { .. } => {}
        }
    }
}
