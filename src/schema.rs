//! Canonical prescription schema: seven sections, 99 leaf fields.
//!
//! The field set is declared once, statically, as `(section, field, rule)`
//! tuples. Nothing in the pipeline infers keys from model output; coercion,
//! normalisation, prompting and serialisation all iterate this table, so the
//! output key set can never drift from what is written here.
//!
//! The [`FieldRule`] attached to each field drives
//! [`crate::pipeline::normalize`]: `Date` fields are reformatted to
//! `YYYY-MM-DD`, `Numeric` fields are reduced to a plain number, and `Text`
//! fields pass through. Identifiers that merely *look* numeric (phone, zip,
//! NPI, DEA, NDC, rx number) are deliberately `Text` so leading zeros and
//! letters survive.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Per-field normalisation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRule {
    /// Free text; passed through unchanged.
    Text,
    /// Calendar date, normalised to `YYYY-MM-DD`.
    Date,
    /// Quantity or amount, normalised to a bare decimal number.
    Numeric,
}

/// One leaf field of the canonical schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub rule: FieldRule,
}

/// One top-level section and its ordered fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionSpec {
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
}

impl SectionSpec {
    /// Position of `field` within this section.
    pub fn position(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == field)
    }
}

/// Ordered mapping of section name → ordered field names.
#[derive(Debug, PartialEq, Eq)]
pub struct CanonicalSchema {
    sections: &'static [SectionSpec],
}

impl CanonicalSchema {
    /// Declare a schema from a static section table.
    pub const fn new(sections: &'static [SectionSpec]) -> Self {
        Self { sections }
    }

    /// The process-wide prescription schema.
    pub fn canonical() -> &'static CanonicalSchema {
        &CANONICAL_SCHEMA
    }

    pub fn sections(&self) -> &'static [SectionSpec] {
        self.sections
    }

    pub fn section(&self, name: &str) -> Option<&'static SectionSpec> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Position of a section in canonical order.
    pub fn section_position(&self, name: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.name == name)
    }

    /// Total number of leaf fields across all sections.
    pub fn field_count(&self) -> usize {
        self.sections.iter().map(|s| s.fields.len()).sum()
    }

    /// Normalisation rule for `section.field`, if the field exists.
    pub fn rule_for(&self, section: &str, field: &str) -> Option<FieldRule> {
        self.section(section)?
            .fields
            .iter()
            .find(|f| f.name == field)
            .map(|f| f.rule)
    }

    /// Iterate `(section, field)` pairs in canonical order.
    pub fn leaves(&self) -> impl Iterator<Item = (&'static SectionSpec, &'static FieldSpec)> {
        self.sections
            .iter()
            .flat_map(|s| s.fields.iter().map(move |f| (s, f)))
    }

    /// Section → key list view used in prompts.
    pub fn outline(&self) -> SchemaOutline<'_> {
        SchemaOutline(self)
    }
}

/// Serialises as `{"section": ["field", …], …}` in canonical order.
pub struct SchemaOutline<'a>(&'a CanonicalSchema);

impl Serialize for SchemaOutline<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.sections.len()))?;
        for section in self.0.sections {
            let names: Vec<&str> = section.fields.iter().map(|f| f.name).collect();
            map.serialize_entry(section.name, &names)?;
        }
        map.end()
    }
}

// ── Static table ─────────────────────────────────────────────────────────

const fn text(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        rule: FieldRule::Text,
    }
}

const fn date(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        rule: FieldRule::Date,
    }
}

const fn numeric(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        rule: FieldRule::Numeric,
    }
}

const ORDER_METADATA: &[FieldSpec] = &[
    text("order_id"),
    date("order_date"),
    text("foreign_order_id"),
    text("document_type"),
    text("priority"),
    text("status"),
    text("activity"),
    date("due_on"),
    text("manager"),
    text("location"),
    text("practice_id"),
    text("source_system"),
    text("creation_user"),
    text("last_modified_user"),
];

const PATIENT_INFORMATION: &[FieldSpec] = &[
    text("patient_id"),
    text("patient_first_name"),
    text("patient_last_name"),
    date("patient_dob"),
    numeric("patient_age"),
    text("patient_gender"),
    text("patient_pregnancy"),
    text("patient_species"),
    text("patient_ethnicity"),
    numeric("patient_weight_kg"),
    numeric("patient_height_cm"),
    text("patient_phone"),
    text("patient_email"),
    text("patient_address_line1"),
    text("patient_address_line2"),
    text("patient_city"),
    text("patient_state"),
    text("patient_zip"),
    text("patient_country"),
    text("patient_insurance_provider"),
    text("patient_insurance_id"),
    text("patient_group_number"),
];

const PRESCRIBER_INFORMATION: &[FieldSpec] = &[
    text("prescriber_id"),
    text("prescriber_first_name"),
    text("prescriber_last_name"),
    text("prescriber_npi"),
    text("prescriber_phone"),
    text("prescriber_fax"),
    text("prescriber_email"),
    text("prescriber_clinic_name"),
    text("prescriber_address_line1"),
    text("prescriber_address_line2"),
    text("prescriber_city"),
    text("prescriber_state"),
    text("prescriber_zip"),
    text("prescriber_license"),
    date("prescriber_license_expiration_date"),
    text("prescriber_dea"),
    date("prescriber_dea_expiration_date"),
    text("prescriber_controlled_license"),
    date("prescriber_controlled_license_expiration"),
    text("prescriber_discipline"),
];

const PAYMENT: &[FieldSpec] = &[
    text("payor"),
    text("payor_lastname"),
    text("payor_firstname"),
    text("payor_address"),
    text("payor_address_line1"),
    text("payor_address_line2"),
    text("payor_city"),
    text("payor_state"),
    text("payor_zip"),
];

const SHIPPING_DELIVERY: &[FieldSpec] = &[
    text("shipping_method"),
    date("ship_date"),
    date("delivery_date"),
    text("tracking_number"),
    text("courier"),
    text("shipping_address_line1"),
    text("shipping_address_line2"),
    text("shipping_city"),
    text("shipping_state"),
    text("shipping_zip"),
    text("shipping_contact_name"),
    text("shipping_contact_phone"),
];

const MEDICATION_PRESCRIPTION_DATA: &[FieldSpec] = &[
    text("rx_number"),
    date("fill_date"),
    text("drug_name"),
    text("strength"),
    text("form"),
    text("ndc_code"),
    text("sig"),
    numeric("days_supply"),
    numeric("quantity_dispensed"),
    numeric("refills_remaining"),
    text("lot_number"),
    date("expiration_date"),
    numeric("unit_price"),
    numeric("ingredient_cost"),
    numeric("dispensing_fee"),
    numeric("tax_amount"),
    numeric("line_total"),
    text("pharmacy_notes"),
];

const CLINICAL: &[FieldSpec] = &[
    text("patient_allergies"),
    text("patient_diseases"),
    text("patient_medication_history"),
    text("patient_encounters"),
];

/// The canonical prescription schema, in output order.
pub static CANONICAL_SCHEMA: CanonicalSchema = CanonicalSchema::new(&[
    SectionSpec {
        name: "order_metadata",
        fields: ORDER_METADATA,
    },
    SectionSpec {
        name: "patient_information",
        fields: PATIENT_INFORMATION,
    },
    SectionSpec {
        name: "prescriber_information",
        fields: PRESCRIBER_INFORMATION,
    },
    SectionSpec {
        name: "payment",
        fields: PAYMENT,
    },
    SectionSpec {
        name: "shipping_delivery",
        fields: SHIPPING_DELIVERY,
    },
    SectionSpec {
        name: "medication_prescription_data",
        fields: MEDICATION_PRESCRIPTION_DATA,
    },
    SectionSpec {
        name: "clinical",
        fields: CLINICAL,
    },
]);
