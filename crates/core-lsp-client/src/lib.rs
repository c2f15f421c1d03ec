//! Typed Language Server Protocol client (component C8, §4.8): the
//! `Uninitialized → Initializing → Ready → ShuttingDown → Exited` state
//! machine, document lifecycle (`didOpen`/debounced `didChange`/`didClose`),
//! the typed request surface, and `WorkspaceEdit` application. Built on
//! [`core_lsp_transport::Transport`] for the wire and [`core_document::Document`]
//! for the buffer it edits.

use core_document::{Diagnostic as DocDiagnostic, Document, DocumentColor, InlayHint, InlayHintKindTag, SemanticToken};
use core_lsp_transport::{Incoming, SessionState, Transport};
use core_text::{CoreError, CoreResult, Rope};
use lsp_types::{Position, Url};
use serde_json::{Value, json};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{trace, warn};

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// Shorthand for the error type shared across the editor core (§7); the LSP
/// client never mints its own variants, it just produces [`CoreError`].
pub type ClientError = CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Uninitialized,
    Initializing,
    Ready,
    ShuttingDown,
    Exited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextDocumentSyncKind {
    None,
    Full,
    Incremental,
}

pub struct InitializeResult {
    pub sync_kind: TextDocumentSyncKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextEditLite {
    pub start: usize,
    pub end: usize,
    pub new_text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionItem {
    pub label: String,
    pub kind: Option<i64>,
    pub detail: Option<String>,
    pub insert_text: String,
    pub import_uri: Option<String>,
    pub additional_edits: Vec<TextEditLite>,
    pub sort_text: Option<String>,
    raw: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HoverResult {
    pub contents: String,
    pub diagnostic: Option<DocDiagnostic>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignatureParameter {
    pub label_range: (usize, usize),
    pub documentation: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignatureHelp {
    pub label: String,
    pub documentation: Option<String>,
    pub parameters: Vec<SignatureParameter>,
    pub active_parameter: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeAction {
    pub title: String,
    pub edit: Option<Value>,
    pub command: Option<Value>,
}

/// Language Server Protocol client for a single open document.
pub struct LspClient {
    transport: Transport,
    state: ClientState,
    sync_kind: TextDocumentSyncKind,
    open_uri: Option<Url>,
    document_version: i32,
    pending_region: Option<core_document::DirtyRegion>,
    debounce_deadline: Option<Instant>,
    hover_cache: HashMap<(usize, usize), Option<HoverResult>>,
}

impl LspClient {
    pub fn new(transport: Transport) -> Self {
        LspClient {
            transport,
            state: ClientState::Uninitialized,
            sync_kind: TextDocumentSyncKind::Full,
            open_uri: None,
            document_version: 0,
            pending_region: None,
            debounce_deadline: None,
            hover_cache: HashMap::new(),
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn session_state(&self) -> SessionState {
        self.transport.state()
    }

    fn ensure_ready(&self) -> Result<(), ClientError> {
        if self.state == ClientState::Ready { Ok(()) } else { Err(ClientError::NotReady) }
    }

    fn open_uri(&self) -> Result<&Url, ClientError> {
        self.open_uri.as_ref().ok_or(ClientError::NotReady)
    }

    // ---- lifecycle -----------------------------------------------------

    pub async fn initialize(&mut self, root_uri: Option<Url>) -> Result<(), ClientError> {
        if self.state != ClientState::Uninitialized {
            return Err(ClientError::NotReady);
        }
        self.state = ClientState::Initializing;
        let params = json!({
            "processId": Value::Null,
            "rootUri": root_uri.map(|u| u.to_string()),
            "capabilities": {},
        });
        let result = self.transport.request("initialize", params).await?;
        self.sync_kind = parse_sync_kind(&result);
        self.transport.notify("initialized", json!({}))?;
        self.state = ClientState::Ready;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ClientError> {
        self.ensure_ready()?;
        self.state = ClientState::ShuttingDown;
        self.transport.request("shutdown", Value::Null).await?;
        Ok(())
    }

    pub fn exit(&mut self) -> Result<(), ClientError> {
        if self.state != ClientState::ShuttingDown {
            return Err(ClientError::NotReady);
        }
        self.transport.notify("exit", Value::Null)?;
        self.state = ClientState::Exited;
        Ok(())
    }

    pub fn reconnect_stream<R, W>(&mut self, reader: R, writer: W)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.transport.reconnect_stream(reader, writer);
        self.state = ClientState::Uninitialized;
        self.open_uri = None;
        self.hover_cache.clear();
        self.pending_region = None;
        self.debounce_deadline = None;
    }

    // ---- document lifecycle ---------------------------------------------

    pub fn open_file(&mut self, path: &str, text: &str) -> Result<(), ClientError> {
        self.ensure_ready()?;
        let uri = path_to_uri(path)?;
        self.document_version = 1;
        self.transport.notify(
            "textDocument/didOpen",
            json!({
                "textDocument": {
                    "uri": uri.to_string(),
                    "languageId": language_id_for(path),
                    "version": 1,
                    "text": text,
                }
            }),
        )?;
        self.open_uri = Some(uri);
        Ok(())
    }

    pub fn close_file(&mut self) -> Result<(), ClientError> {
        let Some(uri) = self.open_uri.take() else { return Ok(()) };
        self.hover_cache.clear();
        self.pending_region = None;
        self.debounce_deadline = None;
        self.transport.notify("textDocument/didClose", json!({"textDocument": {"uri": uri.to_string()}}))
    }

    /// Folds a freshly flushed [`core_document::DirtyRegion`] into the
    /// pending debounce window. The host calls this right after each edit.
    pub fn record_change(&mut self, region: core_document::DirtyRegion) {
        self.hover_cache.clear();
        self.pending_region = Some(match self.pending_region.take() {
            None => region,
            Some(prev) => core_document::DirtyRegion {
                start: prev.start.min(region.start),
                end_new: prev.end_new.max(region.end_new),
                inserted_length: 0,
                old_end: None,
            },
        });
        self.debounce_deadline = Some(Instant::now() + DEBOUNCE_WINDOW);
    }

    /// The host calls this on its own tick; it is a no-op until the
    /// debounce window has elapsed. Returns whether a `didChange` was sent.
    pub fn maybe_flush(&mut self, document: &Document) -> Result<bool, ClientError> {
        let Some(deadline) = self.debounce_deadline else { return Ok(false) };
        if Instant::now() < deadline {
            return Ok(false);
        }
        self.debounce_deadline = None;
        let Some(region) = self.pending_region.take() else { return Ok(false) };
        self.ensure_ready()?;
        let uri = self.open_uri()?.clone();
        self.document_version += 1;

        let content_changes = match (self.sync_kind, region.old_end) {
            (TextDocumentSyncKind::Incremental, Some(old_end)) => {
                let start = offset_to_position(document.rope(), region.start)?;
                let end = offset_to_position(document.rope(), old_end)?;
                let text = document.rope().substring(region.start, region.end_new)?;
                json!([{
                    "range": {"start": position_json(start), "end": position_json(end)},
                    "text": text,
                }])
            }
            _ => json!([{"text": document.rope().to_string()}]),
        };

        self.transport.notify(
            "textDocument/didChange",
            json!({
                "textDocument": {"uri": uri.to_string(), "version": self.document_version},
                "contentChanges": content_changes,
            }),
        )?;
        Ok(true)
    }

    // ---- notifications from the server -----------------------------------

    /// Dispatches one inbound message from the transport's
    /// [`core_lsp_transport::NotificationStream`]. Parse failures are
    /// logged and dropped, per the best-effort notification policy.
    pub fn handle_incoming(&mut self, document: &mut Document, incoming: Incoming) {
        match incoming {
            Incoming::Notification { method, params } => match method.as_str() {
                "textDocument/publishDiagnostics" => {
                    match parse_diagnostics(document.rope(), &params) {
                        Ok(diags) => document.set_diagnostics(diags),
                        Err(e) => warn!(target: "lsp.client", error = %e, "diagnostics_parse_error"),
                    }
                }
                "window/showMessage" => {
                    let message = params.get("message").and_then(Value::as_str).unwrap_or("").to_string();
                    document.events_mut().emit(core_document_events::server_message(message));
                }
                other => trace!(target: "lsp.client", method = other, "notification_ignored"),
            },
            Incoming::ServerRequest { id, method, .. } => {
                warn!(target: "lsp.client", id, method = %method, "server_initiated_request_unsupported");
            }
        }
    }

    // ---- typed requests ---------------------------------------------------

    pub async fn completion(&mut self, document: &Document) -> Result<Vec<CompletionItem>, ClientError> {
        self.ensure_ready()?;
        let uri = self.open_uri()?.clone();
        let cursor = document.selection().extent;
        let position = offset_to_position(document.rope(), cursor)?;
        let result = self
            .transport
            .request(
                "textDocument/completion",
                json!({"textDocument": {"uri": uri.to_string()}, "position": position_json(position)}),
            )
            .await?;

        let raw_items = extract_completion_items(&result);
        let mut items = Vec::with_capacity(raw_items.len());
        for raw in raw_items {
            items.push(parse_completion_item(document.rope(), raw)?);
        }
        let prefix = word_before_cursor(document.rope(), cursor)?;
        items.sort_by(|a, b| completion_cmp(&prefix, a, b));
        Ok(items)
    }

    pub async fn completion_resolve(
        &mut self,
        document: &Document,
        item: &CompletionItem,
    ) -> Result<CompletionItem, ClientError> {
        self.ensure_ready()?;
        let result = self.transport.request("completionItem/resolve", item.raw.clone()).await?;
        parse_completion_item(document.rope(), &result)
    }

    /// Applies a selected completion item's `additional_edits` (descending
    /// start order, one undo transaction), then its main insertion at the
    /// cursor — per §9's resolution of the additional-edits-ordering open
    /// question. No attempt is made to merge an additional edit that
    /// overlaps the insertion site.
    pub fn accept_completion(&mut self, document: &mut Document, item: &CompletionItem) -> Result<(), ClientError> {
        let mut edits = item.additional_edits.clone();
        edits.sort_by(|a, b| b.start.cmp(&a.start));

        let selection_before = document.selection();
        document.begin_transaction(selection_before);
        for edit in &edits {
            document.replace_range(edit.start, edit.end, &edit.new_text)?;
        }
        document.insert_at_cursor(&item.insert_text)?;
        document.commit_transaction(document.selection());
        Ok(())
    }

    pub async fn hover(&mut self, document: &Document) -> Result<Option<HoverResult>, ClientError> {
        self.ensure_ready()?;
        let cursor = document.selection().extent;
        let position = offset_to_position(document.rope(), cursor)?;
        let key = (position.line as usize, position.character as usize);
        if let Some(cached) = self.hover_cache.get(&key) {
            return Ok(cached.clone());
        }
        let uri = self.open_uri()?.clone();
        let result = self
            .transport
            .request(
                "textDocument/hover",
                json!({"textDocument": {"uri": uri.to_string()}, "position": position_json(position)}),
            )
            .await?;
        let hover = parse_hover(document, &result, cursor);
        self.hover_cache.insert(key, hover.clone());
        Ok(hover)
    }

    pub async fn signature_help(&mut self, document: &Document) -> Result<Option<SignatureHelp>, ClientError> {
        self.ensure_ready()?;
        let uri = self.open_uri()?.clone();
        let cursor = document.selection().extent;
        let position = offset_to_position(document.rope(), cursor)?;
        let result = self
            .transport
            .request(
                "textDocument/signatureHelp",
                json!({"textDocument": {"uri": uri.to_string()}, "position": position_json(position)}),
            )
            .await?;
        Ok(parse_signature_help(&result))
    }

    pub async fn code_action(
        &mut self,
        document: &Document,
        range: (usize, usize),
        diagnostics: &[DocDiagnostic],
    ) -> Result<Vec<CodeAction>, ClientError> {
        self.ensure_ready()?;
        let uri = self.open_uri()?.clone();
        let start = offset_to_position(document.rope(), range.0)?;
        let end = offset_to_position(document.rope(), range.1)?;
        let params = json!({
            "textDocument": {"uri": uri.to_string()},
            "range": {"start": position_json(start), "end": position_json(end)},
            "context": {"diagnostics": diagnostics_json(diagnostics)},
        });
        let result = self.transport.request("textDocument/codeAction", params).await?;
        Ok(parse_code_actions(&result))
    }

    pub async fn document_color(&mut self, document: &mut Document) -> Result<(), ClientError> {
        self.ensure_ready()?;
        let uri = self.open_uri()?.clone();
        let result = self
            .transport
            .request("textDocument/documentColor", json!({"textDocument": {"uri": uri.to_string()}}))
            .await?;
        let colors = parse_document_colors(document.rope(), &result)?;
        document.set_document_colors(colors);
        Ok(())
    }

    pub async fn color_presentation(
        &mut self,
        document: &Document,
        range: (usize, usize),
        rgba: (f32, f32, f32, f32),
    ) -> Result<Vec<TextEditLite>, ClientError> {
        self.ensure_ready()?;
        let uri = self.open_uri()?.clone();
        let start = offset_to_position(document.rope(), range.0)?;
        let end = offset_to_position(document.rope(), range.1)?;
        let params = json!({
            "textDocument": {"uri": uri.to_string()},
            "range": {"start": position_json(start), "end": position_json(end)},
            "color": {"red": rgba.0, "green": rgba.1, "blue": rgba.2, "alpha": rgba.3},
        });
        let result = self.transport.request("textDocument/colorPresentation", params).await?;
        let mut edits = Vec::new();
        if let Some(arr) = result.as_array() {
            for item in arr {
                if let Some(edit) = item.get("textEdit") {
                    edits.push(parse_text_edit_lite(document.rope(), edit)?);
                }
            }
        }
        Ok(edits)
    }

    pub async fn inlay_hint(&mut self, document: &mut Document, range: (usize, usize)) -> Result<(), ClientError> {
        self.ensure_ready()?;
        let uri = self.open_uri()?.clone();
        let start = offset_to_position(document.rope(), range.0)?;
        let end = offset_to_position(document.rope(), range.1)?;
        let params = json!({
            "textDocument": {"uri": uri.to_string()},
            "range": {"start": position_json(start), "end": position_json(end)},
        });
        let result = self.transport.request("textDocument/inlayHint", params).await?;
        let hints = parse_inlay_hints(document.rope(), &result)?;
        document.set_inlay_hints(hints);
        Ok(())
    }

    pub async fn semantic_tokens_full(&mut self, document: &mut Document) -> Result<(), ClientError> {
        self.ensure_ready()?;
        let uri = self.open_uri()?.clone();
        let result = self
            .transport
            .request("textDocument/semanticTokens/full", json!({"textDocument": {"uri": uri.to_string()}}))
            .await?;
        let data: Vec<u32> = result
            .get("data")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e: serde_json::Error| ClientError::ParseError(e.to_string()))?
            .unwrap_or_default();
        let tokens = decode_semantic_tokens(&data);
        document.set_semantic_tokens(document.version(), tokens);
        Ok(())
    }

    pub async fn folding_range(&mut self, document: &mut Document) -> Result<(), ClientError> {
        self.ensure_ready()?;
        let uri = self.open_uri()?.clone();
        let result = self
            .transport
            .request("textDocument/foldingRange", json!({"textDocument": {"uri": uri.to_string()}}))
            .await?;
        let ranges = parse_folding_ranges(&result);
        document.merge_lsp_folds(ranges);
        Ok(())
    }

    pub async fn document_highlight(&mut self, document: &mut Document) -> Result<(), ClientError> {
        self.ensure_ready()?;
        let uri = self.open_uri()?.clone();
        let cursor = document.selection().extent;
        let position = offset_to_position(document.rope(), cursor)?;
        let result = self
            .transport
            .request(
                "textDocument/documentHighlight",
                json!({"textDocument": {"uri": uri.to_string()}, "position": position_json(position)}),
            )
            .await?;
        let spans = parse_document_highlights(document.rope(), &result)?;
        document.set_document_highlights(spans);
        Ok(())
    }

    // ---- workspace edit application ---------------------------------------

    /// Applies a `WorkspaceEdit` payload (`{changes}` or `{documentChanges}`)
    /// in a single undo transaction, edits sorted within the file by
    /// descending start position. All edits are validated up front, before
    /// any mutation, so a malformed edit never leaves a partially-applied
    /// transaction on the undo log.
    pub fn apply_workspace_edit(&mut self, document: &mut Document, raw: &Value) -> Result<(), ClientError> {
        let open_uri = self.open_uri()?.clone();
        let edits = extract_text_edits_for_uri(raw, &open_uri)?;
        let mut resolved = Vec::with_capacity(edits.len());
        for (start, end, text) in edits {
            resolved.push((position_to_offset(document.rope(), start)?, position_to_offset(document.rope(), end)?, text));
        }
        resolved.sort_by(|a, b| b.0.cmp(&a.0));

        let selection_before = document.selection();
        document.begin_transaction(selection_before);
        for (start, end, text) in resolved {
            document.replace_range(start, end, &text)?;
        }
        document.commit_transaction(document.selection());
        Ok(())
    }
}

fn parse_sync_kind(initialize_result: &Value) -> TextDocumentSyncKind {
    let sync = initialize_result
        .get("capabilities")
        .and_then(|c| c.get("textDocumentSync"));
    match sync {
        Some(Value::Number(n)) => match n.as_u64() {
            Some(0) => TextDocumentSyncKind::None,
            Some(1) => TextDocumentSyncKind::Full,
            Some(2) => TextDocumentSyncKind::Incremental,
            _ => TextDocumentSyncKind::Full,
        },
        Some(Value::Object(obj)) => match obj.get("change").and_then(Value::as_u64) {
            Some(0) => TextDocumentSyncKind::None,
            Some(2) => TextDocumentSyncKind::Incremental,
            _ => TextDocumentSyncKind::Full,
        },
        _ => TextDocumentSyncKind::Full,
    }
}

fn position_json(p: Position) -> Value {
    json!({"line": p.line, "character": p.character})
}

fn offset_to_position(rope: &Rope, offset: usize) -> CoreResult<Position> {
    let line = rope.line_at_offset(offset)?;
    let line_start = rope.line_start_offset(line)?;
    Ok(Position { line: line as u32, character: (offset - line_start) as u32 })
}

fn position_to_offset(rope: &Rope, pos: Position) -> CoreResult<usize> {
    let line_start = rope.line_start_offset(pos.line as usize)?;
    Ok(line_start + pos.character as usize)
}

fn parse_position(v: &Value) -> Option<Position> {
    Some(Position { line: v.get("line")?.as_u64()? as u32, character: v.get("character")?.as_u64()? as u32 })
}

fn parse_text_edit_lite(rope: &Rope, v: &Value) -> Result<TextEditLite, ClientError> {
    let range = v.get("range").ok_or_else(|| ClientError::ParseError("textEdit missing range".into()))?;
    let start = parse_position(range.get("start").ok_or_else(|| ClientError::ParseError("missing start".into()))?)
        .ok_or_else(|| ClientError::ParseError("malformed start position".into()))?;
    let end = parse_position(range.get("end").ok_or_else(|| ClientError::ParseError("missing end".into()))?)
        .ok_or_else(|| ClientError::ParseError("malformed end position".into()))?;
    let new_text = v.get("newText").and_then(Value::as_str).unwrap_or("").to_string();
    Ok(TextEditLite {
        start: position_to_offset(rope, start)?,
        end: position_to_offset(rope, end)?,
        new_text,
    })
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || matches!(c as u32, 0x0600..=0x06FF | 0x08A0..=0x08FF | 0x0590..=0x05FF)
}

fn word_before_cursor(rope: &Rope, cursor: usize) -> CoreResult<String> {
    let text = rope.substring(0, cursor)?;
    let start = text
        .char_indices()
        .rev()
        .take_while(|(_, c)| is_word_char(*c))
        .last()
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    Ok(text[start..].to_string())
}

fn extract_completion_items(result: &Value) -> Vec<&Value> {
    if let Some(arr) = result.as_array() {
        arr.iter().collect()
    } else if let Some(arr) = result.get("items").and_then(Value::as_array) {
        arr.iter().collect()
    } else {
        Vec::new()
    }
}

fn parse_completion_item(rope: &Rope, v: &Value) -> Result<CompletionItem, ClientError> {
    let label = v.get("label").and_then(Value::as_str).unwrap_or("").to_string();
    let insert_text =
        v.get("insertText").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| label.clone());
    let mut additional_edits = Vec::new();
    if let Some(arr) = v.get("additionalTextEdits").and_then(Value::as_array) {
        for edit in arr {
            additional_edits.push(parse_text_edit_lite(rope, edit)?);
        }
    }
    Ok(CompletionItem {
        label,
        kind: v.get("kind").and_then(Value::as_i64),
        detail: v.get("detail").and_then(Value::as_str).map(str::to_string),
        insert_text,
        import_uri: v.get("data").and_then(|d| d.get("importUri")).and_then(Value::as_str).map(str::to_string),
        additional_edits,
        sort_text: v.get("sortText").and_then(Value::as_str).map(str::to_string),
        raw: v.clone(),
    })
}

fn completion_cmp(prefix: &str, a: &CompletionItem, b: &CompletionItem) -> Ordering {
    let prefix_lower = prefix.to_lowercase();
    let a_match = a.label.to_lowercase().starts_with(&prefix_lower);
    let b_match = b.label.to_lowercase().starts_with(&prefix_lower);
    b_match
        .cmp(&a_match)
        .then_with(|| {
            let a_sort = a.sort_text.as_deref().unwrap_or(&a.label);
            let b_sort = b.sort_text.as_deref().unwrap_or(&b.label);
            a_sort.cmp(b_sort)
        })
        .then_with(|| a.label.len().cmp(&b.label.len()))
}

fn parse_hover(document: &Document, v: &Value, cursor: usize) -> Option<HoverResult> {
    if v.is_null() {
        return None;
    }
    let contents = match v.get("contents") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(obj)) => obj.get("value").and_then(Value::as_str).unwrap_or("").to_string(),
        Some(Value::Array(arr)) => arr
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(o) => o.get("value").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n"),
        _ => return None,
    };
    let diagnostic = document.diagnostics().iter().find(|d| d.range.0 <= cursor && cursor <= d.range.1).cloned();
    Some(HoverResult { contents, diagnostic })
}

fn parse_signature_help(v: &Value) -> Option<SignatureHelp> {
    let signatures = v.get("signatures").and_then(Value::as_array)?;
    let active = v.get("activeSignature").and_then(Value::as_u64).unwrap_or(0) as usize;
    let sig = signatures.get(active).or_else(|| signatures.first())?;
    let label = sig.get("label").and_then(Value::as_str).unwrap_or("").to_string();
    let documentation = sig.get("documentation").and_then(|d| match d {
        Value::String(s) => Some(s.clone()),
        Value::Object(o) => o.get("value").and_then(Value::as_str).map(str::to_string),
        _ => None,
    });
    let parameters: Vec<SignatureParameter> = sig
        .get("parameters")
        .and_then(Value::as_array)
        .map(|params| {
            params
                .iter()
                .filter_map(|p| {
                    let range = match p.get("label") {
                        Some(Value::Array(pair)) if pair.len() == 2 => {
                            (pair[0].as_u64()? as usize, pair[1].as_u64()? as usize)
                        }
                        Some(Value::String(s)) => (0, s.len()),
                        _ => return None,
                    };
                    let documentation = p.get("documentation").and_then(|d| match d {
                        Value::String(s) => Some(s.clone()),
                        Value::Object(o) => o.get("value").and_then(Value::as_str).map(str::to_string),
                        _ => None,
                    });
                    Some(SignatureParameter { label_range: range, documentation })
                })
                .collect()
        })
        .unwrap_or_default();
    if parameters.is_empty() {
        return None;
    }
    let active_parameter = v.get("activeParameter").and_then(Value::as_u64).map(|n| n as usize);
    Some(SignatureHelp { label, documentation, parameters, active_parameter })
}

fn parse_code_actions(v: &Value) -> Vec<CodeAction> {
    v.as_array()
        .map(|arr| {
            arr.iter()
                .map(|item| CodeAction {
                    title: item.get("title").and_then(Value::as_str).unwrap_or("").to_string(),
                    edit: item.get("edit").cloned(),
                    command: item.get("command").cloned(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_document_colors(rope: &Rope, v: &Value) -> Result<Vec<DocumentColor>, ClientError> {
    let mut out = Vec::new();
    if let Some(arr) = v.as_array() {
        for item in arr {
            let range = item.get("range").ok_or_else(|| ClientError::ParseError("missing range".into()))?;
            let start = parse_position(range.get("start").ok_or_else(|| ClientError::ParseError("missing start".into()))?)
                .ok_or_else(|| ClientError::ParseError("malformed start".into()))?;
            let end = parse_position(range.get("end").ok_or_else(|| ClientError::ParseError("missing end".into()))?)
                .ok_or_else(|| ClientError::ParseError("malformed end".into()))?;
            let color = item.get("color").ok_or_else(|| ClientError::ParseError("missing color".into()))?;
            out.push(DocumentColor {
                range: (position_to_offset(rope, start)?, position_to_offset(rope, end)?),
                red: color.get("red").and_then(Value::as_f64).unwrap_or(0.0) as f32,
                green: color.get("green").and_then(Value::as_f64).unwrap_or(0.0) as f32,
                blue: color.get("blue").and_then(Value::as_f64).unwrap_or(0.0) as f32,
                alpha: color.get("alpha").and_then(Value::as_f64).unwrap_or(1.0) as f32,
            });
        }
    }
    Ok(out)
}

fn parse_inlay_hints(rope: &Rope, v: &Value) -> Result<Vec<InlayHint>, ClientError> {
    let mut out = Vec::new();
    if let Some(arr) = v.as_array() {
        for item in arr {
            let position = item.get("position").and_then(parse_position).unwrap_or(Position { line: 0, character: 0 });
            let kind = match item.get("kind").and_then(Value::as_u64) {
                Some(2) => InlayHintKindTag::Parameter,
                _ => InlayHintKindTag::Type,
            };
            out.push(InlayHint {
                position: position_to_offset(rope, position)?,
                label: extract_inlay_label(item),
                kind,
                padding_left: item.get("paddingLeft").and_then(Value::as_bool).unwrap_or(false),
                padding_right: item.get("paddingRight").and_then(Value::as_bool).unwrap_or(false),
            });
        }
    }
    Ok(out)
}

fn extract_inlay_label(v: &Value) -> String {
    match v.get("label") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("value").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn decode_semantic_tokens(data: &[u32]) -> Vec<SemanticToken> {
    let mut line = 0usize;
    let mut col = 0usize;
    let mut tokens = Vec::with_capacity(data.len() / 5);
    for chunk in data.chunks_exact(5) {
        let [delta_line, delta_start, length, token_type, modifiers] = [chunk[0], chunk[1], chunk[2], chunk[3], chunk[4]];
        if delta_line > 0 {
            line += delta_line as usize;
            col = delta_start as usize;
        } else {
            col += delta_start as usize;
        }
        tokens.push(SemanticToken {
            line,
            start_col: col,
            length: length as usize,
            token_type,
            modifiers,
        });
    }
    tokens
}

fn parse_folding_ranges(v: &Value) -> Vec<(usize, usize, Option<String>)> {
    v.as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|r| {
                    let start = r.get("startLine")?.as_u64()? as usize;
                    let end = r.get("endLine")?.as_u64()? as usize;
                    let kind = r.get("kind").and_then(Value::as_str).map(str::to_string);
                    Some((start, end, kind))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_document_highlights(rope: &Rope, v: &Value) -> Result<Vec<(usize, usize)>, ClientError> {
    let mut out = Vec::new();
    if let Some(arr) = v.as_array() {
        for item in arr {
            let range = item.get("range").ok_or_else(|| ClientError::ParseError("missing range".into()))?;
            let start = parse_position(range.get("start").ok_or_else(|| ClientError::ParseError("missing start".into()))?)
                .ok_or_else(|| ClientError::ParseError("malformed start".into()))?;
            let end = parse_position(range.get("end").ok_or_else(|| ClientError::ParseError("missing end".into()))?)
                .ok_or_else(|| ClientError::ParseError("malformed end".into()))?;
            out.push((position_to_offset(rope, start)?, position_to_offset(rope, end)?));
        }
    }
    Ok(out)
}

fn parse_diagnostics(rope: &Rope, params: &Value) -> Result<Vec<DocDiagnostic>, ClientError> {
    let mut out = Vec::new();
    let Some(arr) = params.get("diagnostics").and_then(Value::as_array) else { return Ok(out) };
    for item in arr {
        let range = item.get("range").ok_or_else(|| ClientError::ParseError("missing range".into()))?;
        let start = parse_position(range.get("start").ok_or_else(|| ClientError::ParseError("missing start".into()))?)
            .ok_or_else(|| ClientError::ParseError("malformed start".into()))?;
        let end = parse_position(range.get("end").ok_or_else(|| ClientError::ParseError("missing end".into()))?)
            .ok_or_else(|| ClientError::ParseError("malformed end".into()))?;
        out.push(DocDiagnostic {
            range: (position_to_offset(rope, start)?, position_to_offset(rope, end)?),
            severity: item.get("severity").and_then(Value::as_u64).unwrap_or(1) as u8,
            message: item.get("message").and_then(Value::as_str).unwrap_or("").to_string(),
            source: item.get("source").and_then(Value::as_str).map(str::to_string),
        });
    }
    Ok(out)
}

fn diagnostics_json(diagnostics: &[DocDiagnostic]) -> Value {
    Value::Array(
        diagnostics
            .iter()
            .map(|d| {
                json!({
                    "message": d.message,
                    "severity": d.severity,
                    "source": d.source,
                })
            })
            .collect(),
    )
}

/// Gathers the `TextEdit`s in `raw` that target `open_uri`, as
/// `(start, end, new_text)` position triples. Any entry naming a different
/// file refuses the whole edit.
fn extract_text_edits_for_uri(raw: &Value, open_uri: &Url) -> Result<Vec<(Position, Position, String)>, ClientError> {
    let mut out = Vec::new();
    if let Some(changes) = raw.get("changes").and_then(Value::as_object) {
        for (uri, edits) in changes {
            if uri != open_uri.as_str() {
                return Err(ClientError::CrossFileEditUnsupported);
            }
            if let Some(arr) = edits.as_array() {
                for edit in arr {
                    out.push(parse_raw_text_edit(edit)?);
                }
            }
        }
    }
    if let Some(doc_changes) = raw.get("documentChanges").and_then(Value::as_array) {
        for change in doc_changes {
            let Some(uri) = change.get("textDocument").and_then(|td| td.get("uri")).and_then(Value::as_str) else {
                continue;
            };
            if uri != open_uri.as_str() {
                return Err(ClientError::CrossFileEditUnsupported);
            }
            if let Some(arr) = change.get("edits").and_then(Value::as_array) {
                for edit in arr {
                    out.push(parse_raw_text_edit(edit)?);
                }
            }
        }
    }
    Ok(out)
}

fn parse_raw_text_edit(v: &Value) -> Result<(Position, Position, String), ClientError> {
    let range = v.get("range").ok_or_else(|| ClientError::ParseError("textEdit missing range".into()))?;
    let start = parse_position(range.get("start").ok_or_else(|| ClientError::ParseError("missing start".into()))?)
        .ok_or_else(|| ClientError::ParseError("malformed start".into()))?;
    let end = parse_position(range.get("end").ok_or_else(|| ClientError::ParseError("missing end".into()))?)
        .ok_or_else(|| ClientError::ParseError("malformed end".into()))?;
    let new_text = v.get("newText").and_then(Value::as_str).unwrap_or("").to_string();
    Ok((start, end, new_text))
}

fn path_to_uri(path: &str) -> Result<Url, ClientError> {
    Url::from_file_path(path).map_err(|_| ClientError::ParseError(format!("not an absolute path: {path}")))
}

fn language_id_for(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("rs") => "rust",
        Some("toml") => "toml",
        Some("md") => "markdown",
        Some("json") => "json",
        Some("js") => "javascript",
        Some("ts") => "typescript",
        Some("py") => "python",
        _ => "plaintext",
    }
}

/// `core-events` doesn't expose an `Event` constructor for server messages
/// beyond the variant itself; this indirection keeps the import local to
/// where it's used.
mod core_document_events {
    pub fn server_message(message: String) -> core_events::Event {
        core_events::Event::ServerMessage { message }
    }
}
