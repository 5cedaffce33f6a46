//! SQLite schema definition

/// SQL schema for the document registry
pub const SCHEMA_SQL: &str = r#"
-- Document schemas: guide structured field extraction
CREATE TABLE IF NOT EXISTS document_schemas (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    document_type TEXT NOT NULL UNIQUE,
    description TEXT,
    field_schema TEXT NOT NULL DEFAULT '{"properties":{}}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Documents: one row per distinct uploaded content
CREATE TABLE IF NOT EXISTS documents (
    doc_no INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    sha256 TEXT NOT NULL UNIQUE,
    storage_path TEXT NOT NULL,
    original_filename TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'uploaded'
        CHECK (status IN ('uploaded', 'processing', 'ocr_done', 'extracted', 'ready', 'error')),
    ocr_text TEXT,
    page_count INTEGER,
    title TEXT,
    document_type TEXT,
    schema_id TEXT REFERENCES document_schemas(id) ON DELETE SET NULL,
    error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Tags: names are unique ignoring case
CREATE TABLE IF NOT EXISTS tags (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE COLLATE NOCASE,
    color TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS document_tags (
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    source TEXT NOT NULL DEFAULT 'ai' CHECK (source IN ('ai', 'manual')),
    confidence REAL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (document_id, tag_id)
);

CREATE TABLE IF NOT EXISTS document_fields (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    field_name TEXT NOT NULL,
    field_value TEXT,
    field_type TEXT NOT NULL DEFAULT 'text',
    source TEXT NOT NULL DEFAULT 'ai' CHECK (source IN ('ai', 'manual')),
    confidence REAL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(document_id, field_name)
);

-- Embeddings: JSON float arrays, one row per chunk
CREATE TABLE IF NOT EXISTS document_embeddings (
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    chunk_index INTEGER NOT NULL,
    chunk_text TEXT NOT NULL,
    embedding TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (document_id, chunk_index)
);

CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
CREATE INDEX IF NOT EXISTS idx_documents_type ON documents(document_type);
CREATE INDEX IF NOT EXISTS idx_documents_created ON documents(created_at);
CREATE INDEX IF NOT EXISTS idx_document_tags_tag ON document_tags(tag_id);
CREATE INDEX IF NOT EXISTS idx_document_fields_doc ON document_fields(document_id);
"#;

/// Full-text index over `documents(title, ocr_text)`, kept in sync by triggers.
///
/// The tokenizer is only applied when the table is first created.
pub fn fts_schema_sql(tokenizer: &str) -> String {
    format!(
        r#"
CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts USING fts5(
    title,
    ocr_text,
    content='documents',
    content_rowid='doc_no',
    tokenize='{tokenizer}'
);

CREATE TRIGGER IF NOT EXISTS documents_fts_ai AFTER INSERT ON documents BEGIN
    INSERT INTO documents_fts(rowid, title, ocr_text)
    VALUES (NEW.doc_no, NEW.title, NEW.ocr_text);
END;

CREATE TRIGGER IF NOT EXISTS documents_fts_ad AFTER DELETE ON documents BEGIN
    INSERT INTO documents_fts(documents_fts, rowid, title, ocr_text)
    VALUES ('delete', OLD.doc_no, OLD.title, OLD.ocr_text);
END;

CREATE TRIGGER IF NOT EXISTS documents_fts_au AFTER UPDATE OF title, ocr_text ON documents BEGIN
    INSERT INTO documents_fts(documents_fts, rowid, title, ocr_text)
    VALUES ('delete', OLD.doc_no, OLD.title, OLD.ocr_text);
    INSERT INTO documents_fts(rowid, title, ocr_text)
    VALUES (NEW.doc_no, NEW.title, NEW.ocr_text);
END;
"#,
        tokenizer = tokenizer
    )
}
