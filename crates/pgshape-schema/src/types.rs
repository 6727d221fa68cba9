//! Column types.
//!
//! [`FieldType`] is a closed set: every type the engine knows about is a
//! variant carrying its own attributes, so comparing two types is plain
//! structural equality.
//!
//! Front-ends and catalog introspection never construct variants by hand from
//! strings; they go through the [registry](FieldType::registry), which maps a
//! type tag (`"varchar"`, `"timestamptz"`, …) to a constructor.

use std::fmt;

/// Precision the engine reports for time and timestamp columns declared
/// without one.
pub const DEFAULT_TIME_PRECISION: u32 = 6;

/// Postgres column types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// SMALLINT (2 bytes)
    SmallInt,
    /// INTEGER (4 bytes)
    Integer,
    /// BIGINT (8 bytes)
    BigInt,
    /// REAL (4 bytes floating point)
    Real,
    /// DOUBLE PRECISION (8 bytes floating point)
    Double,
    /// NUMERIC, optionally with precision and scale
    Numeric {
        precision: Option<u32>,
        scale: Option<u32>,
    },
    /// BOOLEAN
    Boolean,
    /// CHARACTER(n)
    Char { length: u32 },
    /// CHARACTER VARYING, optionally bounded
    Varchar { length: Option<u32> },
    /// TEXT
    Text,
    /// BYTEA (binary)
    Bytea,
    /// DATE
    Date,
    /// TIME / TIMETZ
    Time { precision: u32, time_zone: bool },
    /// TIMESTAMP / TIMESTAMPTZ
    Timestamp { precision: u32, time_zone: bool },
    /// INTERVAL
    Interval,
    /// UUID
    Uuid,
    /// JSON
    Json,
    /// JSONB
    Jsonb,
    /// INET
    Inet,
    /// CIDR
    Cidr,
    /// MACADDR
    MacAddr,
    /// A user-defined enum type, by name
    Enum(String),
    /// An array of another type
    Array(Box<FieldType>),
}

/// Attributes a type constructor may consume.
///
/// Constructors ignore attributes that don't apply to their type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeAttrs {
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    /// Type name, for `enum`.
    pub name: Option<String>,
    /// Element type, for `array`.
    pub element: Option<Box<FieldType>>,
}

impl TypeAttrs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn scale(mut self, scale: u32) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn element(mut self, element: FieldType) -> Self {
        self.element = Some(Box::new(element));
        self
    }
}

/// A registered type constructor.
pub type Constructor = fn(&TypeAttrs) -> Result<FieldType, UnknownType>;

/// Error returned when a tag or its attributes don't describe a known type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnknownType {
    #[error("unknown type `{0}`")]
    Tag(String),

    #[error("type `{tag}` requires the `{attr}` attribute")]
    MissingAttr { tag: &'static str, attr: &'static str },
}

static REGISTRY: &[(&str, Constructor)] = &[
    ("smallint", |_| Ok(FieldType::SmallInt)),
    ("integer", |_| Ok(FieldType::Integer)),
    ("bigint", |_| Ok(FieldType::BigInt)),
    ("real", |_| Ok(FieldType::Real)),
    ("double", |_| Ok(FieldType::Double)),
    // NUMERIC(p) is stored as NUMERIC(p, 0)
    ("numeric", |a| {
        Ok(FieldType::Numeric {
            precision: a.precision,
            scale: a.scale.or(a.precision.map(|_| 0)),
        })
    }),
    ("boolean", |_| Ok(FieldType::Boolean)),
    ("char", |a| {
        Ok(FieldType::Char {
            length: a.length.unwrap_or(1),
        })
    }),
    ("varchar", |a| Ok(FieldType::Varchar { length: a.length })),
    ("text", |_| Ok(FieldType::Text)),
    ("bytea", |_| Ok(FieldType::Bytea)),
    ("date", |_| Ok(FieldType::Date)),
    ("time", |a| {
        Ok(FieldType::Time {
            precision: a.precision.unwrap_or(DEFAULT_TIME_PRECISION),
            time_zone: false,
        })
    }),
    ("timetz", |a| {
        Ok(FieldType::Time {
            precision: a.precision.unwrap_or(DEFAULT_TIME_PRECISION),
            time_zone: true,
        })
    }),
    ("timestamp", |a| {
        Ok(FieldType::Timestamp {
            precision: a.precision.unwrap_or(DEFAULT_TIME_PRECISION),
            time_zone: false,
        })
    }),
    ("timestamptz", |a| {
        Ok(FieldType::Timestamp {
            precision: a.precision.unwrap_or(DEFAULT_TIME_PRECISION),
            time_zone: true,
        })
    }),
    ("interval", |_| Ok(FieldType::Interval)),
    ("uuid", |_| Ok(FieldType::Uuid)),
    ("json", |_| Ok(FieldType::Json)),
    ("jsonb", |_| Ok(FieldType::Jsonb)),
    ("inet", |_| Ok(FieldType::Inet)),
    ("cidr", |_| Ok(FieldType::Cidr)),
    ("macaddr", |_| Ok(FieldType::MacAddr)),
    ("enum", |a| match &a.name {
        Some(name) => Ok(FieldType::Enum(name.clone())),
        None => Err(UnknownType::MissingAttr {
            tag: "enum",
            attr: "name",
        }),
    }),
    ("array", |a| match &a.element {
        Some(element) => Ok(FieldType::Array(element.clone())),
        None => Err(UnknownType::MissingAttr {
            tag: "array",
            attr: "element",
        }),
    }),
];

impl FieldType {
    /// All registered type tags with their constructors, in declaration order.
    pub fn registry() -> &'static [(&'static str, Constructor)] {
        REGISTRY
    }

    /// Build a type from its tag and attributes.
    pub fn build(tag: &str, attrs: &TypeAttrs) -> Result<FieldType, UnknownType> {
        let (_, constructor) = REGISTRY
            .iter()
            .find(|(t, _)| *t == tag)
            .ok_or_else(|| UnknownType::Tag(tag.to_string()))?;
        constructor(attrs)
    }

    /// The registry tag for this type.
    pub fn tag(&self) -> &'static str {
        match self {
            FieldType::SmallInt => "smallint",
            FieldType::Integer => "integer",
            FieldType::BigInt => "bigint",
            FieldType::Real => "real",
            FieldType::Double => "double",
            FieldType::Numeric { .. } => "numeric",
            FieldType::Boolean => "boolean",
            FieldType::Char { .. } => "char",
            FieldType::Varchar { .. } => "varchar",
            FieldType::Text => "text",
            FieldType::Bytea => "bytea",
            FieldType::Date => "date",
            FieldType::Time {
                time_zone: false, ..
            } => "time",
            FieldType::Time {
                time_zone: true, ..
            } => "timetz",
            FieldType::Timestamp {
                time_zone: false, ..
            } => "timestamp",
            FieldType::Timestamp {
                time_zone: true, ..
            } => "timestamptz",
            FieldType::Interval => "interval",
            FieldType::Uuid => "uuid",
            FieldType::Json => "json",
            FieldType::Jsonb => "jsonb",
            FieldType::Inet => "inet",
            FieldType::Cidr => "cidr",
            FieldType::MacAddr => "macaddr",
            FieldType::Enum(_) => "enum",
            FieldType::Array(_) => "array",
        }
    }

    /// VARCHAR with a maximum length.
    pub fn varchar(length: u32) -> Self {
        FieldType::Varchar {
            length: Some(length),
        }
    }

    /// NUMERIC(precision, scale).
    pub fn numeric(precision: u32, scale: u32) -> Self {
        FieldType::Numeric {
            precision: Some(precision),
            scale: Some(scale),
        }
    }

    /// TIMESTAMP with the default precision.
    pub fn timestamp() -> Self {
        FieldType::Timestamp {
            precision: DEFAULT_TIME_PRECISION,
            time_zone: false,
        }
    }

    /// TIMESTAMPTZ with the default precision.
    pub fn timestamptz() -> Self {
        FieldType::Timestamp {
            precision: DEFAULT_TIME_PRECISION,
            time_zone: true,
        }
    }

    pub fn enumeration(name: impl Into<String>) -> Self {
        FieldType::Enum(name.into())
    }

    pub fn array_of(element: FieldType) -> Self {
        FieldType::Array(Box::new(element))
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::SmallInt => write!(f, "smallint"),
            FieldType::Integer => write!(f, "integer"),
            FieldType::BigInt => write!(f, "bigint"),
            FieldType::Real => write!(f, "real"),
            FieldType::Double => write!(f, "double precision"),
            FieldType::Numeric {
                precision: Some(p),
                scale: Some(s),
            } => write!(f, "numeric({}, {})", p, s),
            FieldType::Numeric {
                precision: Some(p),
                scale: None,
            } => write!(f, "numeric({})", p),
            FieldType::Numeric { .. } => write!(f, "numeric"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Char { length } => write!(f, "character({})", length),
            FieldType::Varchar { length: Some(n) } => write!(f, "character varying({})", n),
            FieldType::Varchar { length: None } => write!(f, "character varying"),
            FieldType::Text => write!(f, "text"),
            FieldType::Bytea => write!(f, "bytea"),
            FieldType::Date => write!(f, "date"),
            FieldType::Time {
                precision,
                time_zone,
            } => write!(
                f,
                "time({}) {} time zone",
                precision,
                if *time_zone { "with" } else { "without" }
            ),
            FieldType::Timestamp {
                precision,
                time_zone,
            } => write!(
                f,
                "timestamp({}) {} time zone",
                precision,
                if *time_zone { "with" } else { "without" }
            ),
            FieldType::Interval => write!(f, "interval"),
            FieldType::Uuid => write!(f, "uuid"),
            FieldType::Json => write!(f, "json"),
            FieldType::Jsonb => write!(f, "jsonb"),
            FieldType::Inet => write!(f, "inet"),
            FieldType::Cidr => write!(f, "cidr"),
            FieldType::MacAddr => write!(f, "macaddr"),
            FieldType::Enum(name) => write!(f, "\"{}\"", name.replace('"', "\"\"")),
            FieldType::Array(element) => write!(f, "{}[]", element),
        }
    }
}
