//! Prompt construction for classification and field extraction

use crate::llm::ChatMessage;
use crate::meta::{DocumentSchema, SchemaField};

/// Sentinel type for documents matching no known schema
pub const OTHER_TYPE: &str = "other";

/// First `max_chars` characters of `text`
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

pub fn classification_messages(
    ocr_text: &str,
    schemas: &[DocumentSchema],
    max_chars: usize,
) -> Vec<ChatMessage> {
    let mut known = String::new();
    for schema in schemas {
        known.push_str(&format!(
            "- {}: {}\n",
            schema.document_type,
            schema.description.as_deref().unwrap_or(&schema.name)
        ));
    }
    known.push_str(&format!("- {}: Unbekannter oder sonstiger Typ\n", OTHER_TYPE));

    let system = format!(
        "Du klassifizierst eingescannte Dokumente. Bestimme den Dokumenttyp anhand des Textes.\n\
         Bekannte Typen:\n{known}\n\
         Antworte ausschließlich als JSON-Objekt:\n\
         {{\"document_type\": \"<typ>\", \"title\": \"<kurzer Titel>\", \"tags\": [\"<tag>\"]}}\n\
         - document_type: einer der bekannten Typen oder \"{other}\"\n\
         - title: kurzer, beschreibender Titel\n\
         - tags: 2 bis 5 relevante Schlagworte",
        known = known,
        other = OTHER_TYPE
    );

    vec![
        ChatMessage::system(system),
        ChatMessage::user(truncate_chars(ocr_text, max_chars)),
    ]
}

pub fn schema_extraction_messages(
    ocr_text: &str,
    schema: &DocumentSchema,
    fields: &[SchemaField],
    max_chars: usize,
) -> Vec<ChatMessage> {
    let mut field_lines = String::new();
    for field in fields {
        field_lines.push_str(&format!(
            "- {} ({}){}\n",
            field.name,
            field.field_type,
            field
                .description
                .as_deref()
                .map(|d| format!(": {}", d))
                .unwrap_or_default()
        ));
    }

    let system = format!(
        "Extrahiere Felder aus einem Dokument vom Typ \"{doc_type}\".\n\
         Felder:\n{fields}\n\
         Schema: {schema}\n\
         Antworte als flaches JSON-Objekt mit genau diesen Feldnamen als Schlüssel. \
         Nutze null für Felder, die im Dokument nicht vorkommen.",
        doc_type = schema.document_type,
        fields = field_lines,
        schema = schema.field_schema
    );

    vec![
        ChatMessage::system(system),
        ChatMessage::user(truncate_chars(ocr_text, max_chars)),
    ]
}

pub fn freeform_extraction_messages(
    ocr_text: &str,
    max_fields: usize,
    max_chars: usize,
) -> Vec<ChatMessage> {
    let system = format!(
        "Extrahiere die wichtigsten Schlüssel-Wert-Paare aus diesem Dokument als flaches JSON-Objekt.\n\
         Beispiel: {{\"absender\": \"Erika Musterfrau\", \"datum\": \"2024-01-15\", \"betrag\": \"123.45\"}}\n\
         Höchstens {max} Felder. Feldnamen auf Deutsch in snake_case, Werte als Text oder Zahl.",
        max = max_fields
    );

    vec![
        ChatMessage::system(system),
        ChatMessage::user(truncate_chars(ocr_text, max_chars)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> DocumentSchema {
        DocumentSchema {
            id: "s1".to_string(),
            name: "Rechnung".to_string(),
            document_type: "invoice".to_string(),
            description: Some("Rechnungen von Lieferanten".to_string()),
            field_schema: r#"{"properties":{"betrag":{"type":"currency"}}}"#.to_string(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("äöü", 2), "äö");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn test_classification_lists_known_types() {
        let text = "x".repeat(5000);
        let messages = classification_messages(&text, &[schema()], 4000);
        assert!(messages[0].content.contains("- invoice: Rechnungen von Lieferanten"));
        assert!(messages[0].content.contains("- other:"));
        assert_eq!(messages[1].content.chars().count(), 4000);
    }

    #[test]
    fn test_schema_prompt_names_fields() {
        let s = schema();
        let fields = s.fields().unwrap();
        let messages = schema_extraction_messages("Betrag 10 EUR", &s, &fields, 8000);
        assert!(messages[0].content.contains("- betrag (currency)"));
        assert!(messages[0].content.contains("null"));
    }
}
