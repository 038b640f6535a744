//! Devtools panel bridge.
//!
//! The panel shows blocked/allowed request records for one inspected tab.
//! Records are deduplicated and updated in place rather than appended,
//! using the match heuristic of ARCHITECTURE.md Section 6, so a request
//! that is first seen unfiltered and later matched by a filter keeps its
//! position in the table.
//!
//! The search overlay lives outside the extension's own frame, so it
//! speaks plain `performSearch`/`cancelSearch` messages rather than the
//! extension API.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::connection::ConnectionManager;
use crate::identifiers::TabId;
use crate::listen::{ListenRequest, listen};
use crate::protocol::Envelope;

// ============================================================================
// Constants
// ============================================================================

/// Topic the panel subscribes to.
pub const REQUESTS_TOPIC: &str = "requests";

/// Action carrying one new/updated request record.
pub const HITS_ACTION: &str = "hits";

/// Action signalling the inspected page reloaded.
pub const RESET_ACTION: &str = "reset";

// ============================================================================
// ItemType
// ============================================================================

/// Resource type of a request record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemType {
    /// Top-level document.
    Document,
    /// Frame within a document.
    Subdocument,
    /// Image resource.
    Image,
    /// Script resource.
    Script,
    /// Stylesheet resource.
    Stylesheet,
    /// Plugin content.
    Object,
    /// Audio/video resource.
    Media,
    /// Web font.
    Font,
    /// Fetch/XHR request.
    Xmlhttprequest,
    /// Popup window.
    Popup,
    /// Content-Security-Policy injection.
    Csp,
    /// Element hiding.
    Elemhide,
    /// Anything else.
    Other,
}

impl ItemType {
    /// Document and frame records form one family for matching purposes:
    /// allowlisting a top-level document suppresses finer-grained matches
    /// within it.
    #[inline]
    #[must_use]
    pub const fn is_frame(self) -> bool {
        matches!(self, Self::Document | Self::Subdocument)
    }
}

// ============================================================================
// FilterHit
// ============================================================================

/// The filter that matched a request, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterHit {
    /// Filter text, e.g. `||ads.example^`.
    pub text: String,
    /// Title of the subscription the filter came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
    /// Whether the filter allowlists rather than blocks.
    #[serde(default)]
    pub allowlisted: bool,
}

impl FilterHit {
    /// Creates a blocking filter hit.
    #[must_use]
    pub fn blocking(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            subscription: None,
            allowlisted: false,
        }
    }

    /// Creates an allowlisting filter hit.
    #[must_use]
    pub fn allowlisting(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            subscription: None,
            allowlisted: true,
        }
    }
}

// ============================================================================
// RequestRecord
// ============================================================================

/// One row of the panel table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    /// Request URL; element-hiding records have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Domain of the document the request belongs to.
    pub doc_domain: String,
    /// Resource type.
    pub item_type: ItemType,
    /// CSS selector, for element-hiding records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// The filter that matched, once one has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterHit>,
}

impl RequestRecord {
    /// Creates an unmatched network request record.
    #[must_use]
    pub fn request(
        url: impl Into<String>,
        doc_domain: impl Into<String>,
        item_type: ItemType,
    ) -> Self {
        Self {
            url: Some(url.into()),
            doc_domain: doc_domain.into(),
            item_type,
            selector: None,
            filter: None,
        }
    }

    /// Creates an element-hiding record.
    #[must_use]
    pub fn element_hiding(doc_domain: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            url: None,
            doc_domain: doc_domain.into(),
            item_type: ItemType::Elemhide,
            selector: Some(selector.into()),
            filter: None,
        }
    }

    /// Attaches the matching filter.
    #[must_use]
    pub fn with_filter(mut self, filter: FilterHit) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Derives the registrable host of a URL, for `doc_domain` fields.
    #[must_use]
    pub fn domain_of(url: &str) -> Option<String> {
        Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_string))
    }

    /// The match heuristic: whether `other` describes the same request.
    ///
    /// Base key is URL + document domain + item type, with three
    /// documented exceptions:
    ///
    /// - a `Document` record and a frame record are one family;
    /// - element-hiding records additionally require the same selector;
    /// - CSP records match only when filter text is identical, since
    ///   several distinct CSP filters legitimately apply to one document.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        let same_type = self.item_type == other.item_type
            || (self.item_type.is_frame() && other.item_type.is_frame());
        if !same_type {
            return false;
        }

        if self.url != other.url || self.doc_domain != other.doc_domain {
            return false;
        }

        if self.item_type == ItemType::Elemhide {
            return self.selector == other.selector;
        }

        if self.item_type == ItemType::Csp && other.item_type == ItemType::Csp {
            let own = self.filter.as_ref().map(|filter| filter.text.as_str());
            let theirs = other.filter.as_ref().map(|filter| filter.text.as_str());
            return own == theirs;
        }

        true
    }
}

// ============================================================================
// PanelEvent
// ============================================================================

/// What recording one request did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelEvent {
    /// A new row was appended at `index`.
    Added {
        /// Position of the new row.
        index: usize,
    },
    /// The row at `index` was updated in place.
    Updated {
        /// Position of the existing row.
        index: usize,
    },
}

// ============================================================================
// Panel
// ============================================================================

/// The deduplicated record table backing the devtools panel.
#[derive(Default)]
pub struct Panel {
    records: Vec<RequestRecord>,
}

impl Panel {
    /// Creates an empty panel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one request, deduplicating against existing rows.
    ///
    /// A match updates the existing row at its original index (adopting
    /// the incoming filter when there is one), so table order is stable.
    pub fn record(&mut self, record: RequestRecord) -> PanelEvent {
        if let Some(index) = self
            .records
            .iter()
            .position(|existing| existing.matches(&record))
        {
            if let Some(filter) = record.filter {
                self.records[index].filter = Some(filter);
            }
            return PanelEvent::Updated { index };
        }

        self.records.push(record);
        PanelEvent::Added {
            index: self.records.len() - 1,
        }
    }

    /// Removes the row at `index`.
    pub fn remove(&mut self, index: usize) -> Option<RequestRecord> {
        if index < self.records.len() {
            Some(self.records.remove(index))
        } else {
            None
        }
    }

    /// Clears the table (inspected page reloaded).
    pub fn reset(&mut self) {
        self.records.clear();
    }

    /// Returns the rows in table order.
    #[inline]
    #[must_use]
    pub fn records(&self) -> &[RequestRecord] {
        &self.records
    }

    /// Returns the number of rows.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the table is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns indices of rows matching a search query.
    ///
    /// Case-insensitive substring match over URL, selector, and filter
    /// text.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<usize> {
        let query = query.to_lowercase();
        self.records
            .iter()
            .enumerate()
            .filter(|(_, record)| {
                let haystacks = [
                    record.url.as_deref(),
                    record.selector.as_deref(),
                    record.filter.as_ref().map(|filter| filter.text.as_str()),
                ];
                haystacks
                    .into_iter()
                    .flatten()
                    .any(|text| text.to_lowercase().contains(&query))
            })
            .map(|(index, _)| index)
            .collect()
    }
}

// ============================================================================
// PanelMessage
// ============================================================================

/// Panel-bound table mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PanelMessage {
    /// Append a row.
    AddRecord {
        /// The new row.
        record: RequestRecord,
    },
    /// Update the row at `index` in place.
    UpdateRecord {
        /// Position of the row.
        index: usize,
        /// Its new contents.
        record: RequestRecord,
    },
    /// Remove the row at `index`.
    RemoveRecord {
        /// Position of the row.
        index: usize,
    },
    /// Clear the table.
    Reset,
}

// ============================================================================
// PanelCommand
// ============================================================================

/// Commands from the search overlay to the panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PanelCommand {
    /// Highlight rows matching `query`.
    #[serde(rename = "performSearch")]
    PerformSearch {
        /// Search text.
        query: String,
    },
    /// Clear the search highlight.
    #[serde(rename = "cancelSearch")]
    CancelSearch,
}

// ============================================================================
// DevtoolsBridge
// ============================================================================

/// Ties a connection manager and subscriptions to a panel for one tab.
///
/// Incoming `requests.respond` events mutate the panel and come out the
/// update stream as [`PanelMessage`]s ready for rendering.
pub struct DevtoolsBridge {
    panel: Mutex<Panel>,
    updates: mpsc::UnboundedSender<PanelMessage>,
}

impl DevtoolsBridge {
    /// Opens the bridge for one inspected tab.
    ///
    /// Subscribes to record hits and resets scoped to `tab_id`; the
    /// subscription is re-declared across hub restarts like any other.
    pub async fn open(
        manager: &Arc<ConnectionManager>,
        tab_id: TabId,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PanelMessage>) {
        let (updates, updates_rx) = mpsc::unbounded_channel();

        let bridge = Arc::new(Self {
            panel: Mutex::new(Panel::new()),
            updates,
        });

        let weak = Arc::downgrade(&bridge);
        manager.add_message_listener(Arc::new(move |envelope: &Envelope| {
            if let Some(bridge) = weak.upgrade() {
                bridge.handle_event(envelope);
            }
        }));

        listen(
            manager,
            ListenRequest::new(REQUESTS_TOPIC, [HITS_ACTION, RESET_ACTION]).for_tab(tab_id),
        )
        .await;

        (bridge, updates_rx)
    }

    /// Returns the current number of table rows.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.panel.lock().len()
    }

    /// Handles a search-overlay command.
    ///
    /// Returns the matching row indices for a search, `None` for a
    /// cancellation.
    #[must_use]
    pub fn handle_command(&self, command: &PanelCommand) -> Option<Vec<usize>> {
        match command {
            PanelCommand::PerformSearch { query } => Some(self.panel.lock().search(query)),
            PanelCommand::CancelSearch => None,
        }
    }

    fn handle_event(&self, envelope: &Envelope) {
        let Envelope::Event {
            topic,
            action,
            args,
        } = envelope
        else {
            return;
        };
        if topic != REQUESTS_TOPIC {
            return;
        }

        match action.as_str() {
            HITS_ACTION => {
                let Some(raw) = args.first() else {
                    warn!("hits event without a record");
                    return;
                };
                match serde_json::from_value::<RequestRecord>(raw.clone()) {
                    Ok(record) => self.apply(record),
                    Err(e) => warn!(error = %e, "dropping malformed record"),
                }
            }

            RESET_ACTION => {
                self.panel.lock().reset();
                let _ = self.updates.send(PanelMessage::Reset);
            }

            other => debug!(action = other, "ignoring requests event"),
        }
    }

    fn apply(&self, record: RequestRecord) {
        let message = {
            let mut panel = self.panel.lock();
            match panel.record(record) {
                PanelEvent::Added { index } => PanelMessage::AddRecord {
                    record: panel.records()[index].clone(),
                },
                PanelEvent::Updated { index } => PanelMessage::UpdateRecord {
                    index,
                    record: panel.records()[index].clone(),
                },
            }
        };
        let _ = self.updates.send(message);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::hub::MessageHub;
    use crate::transport::memory;

    #[test]
    fn test_unfiltered_then_filtered_updates_in_place() {
        let mut panel = Panel::new();

        let added = panel.record(RequestRecord::request(
            "https://ads.example/banner.png",
            "news.example",
            ItemType::Image,
        ));
        assert_eq!(added, PanelEvent::Added { index: 0 });

        // An unrelated row lands in between.
        panel.record(RequestRecord::request(
            "https://cdn.example/app.js",
            "news.example",
            ItemType::Script,
        ));

        let updated = panel.record(
            RequestRecord::request(
                "https://ads.example/banner.png",
                "news.example",
                ItemType::Image,
            )
            .with_filter(FilterHit::blocking("||ads.example^")),
        );

        // Same row, original position, filter attached.
        assert_eq!(updated, PanelEvent::Updated { index: 0 });
        assert_eq!(panel.len(), 2);
        assert_eq!(
            panel.records()[0].filter.as_ref().map(|f| f.text.as_str()),
            Some("||ads.example^")
        );
    }

    #[test]
    fn test_distinct_csp_filters_are_not_merged() {
        let mut panel = Panel::new();

        let base = RequestRecord::request("https://news.example/", "news.example", ItemType::Csp);

        panel.record(base.clone().with_filter(FilterHit::blocking(
            "news.example$csp=script-src 'none'",
        )));
        let second = panel.record(base.clone().with_filter(FilterHit::blocking(
            "news.example$csp=worker-src 'none'",
        )));

        assert_eq!(second, PanelEvent::Added { index: 1 });
        assert_eq!(panel.len(), 2);

        // Identical filter text does merge.
        let repeat = panel.record(base.with_filter(FilterHit::blocking(
            "news.example$csp=script-src 'none'",
        )));
        assert_eq!(repeat, PanelEvent::Updated { index: 0 });
        assert_eq!(panel.len(), 2);
    }

    #[test]
    fn test_element_hiding_requires_matching_selector() {
        let mut panel = Panel::new();

        panel.record(RequestRecord::element_hiding("news.example", "#ad-banner"));
        let other = panel.record(RequestRecord::element_hiding("news.example", ".sponsored"));
        assert_eq!(other, PanelEvent::Added { index: 1 });

        let same = panel.record(
            RequestRecord::element_hiding("news.example", "#ad-banner")
                .with_filter(FilterHit::blocking("news.example###ad-banner")),
        );
        assert_eq!(same, PanelEvent::Updated { index: 0 });
    }

    #[test]
    fn test_document_and_frame_records_are_one_family() {
        let mut panel = Panel::new();

        panel.record(
            RequestRecord::request("https://news.example/", "news.example", ItemType::Document)
                .with_filter(FilterHit::allowlisting("@@||news.example^$document")),
        );

        let frame = panel.record(RequestRecord::request(
            "https://news.example/",
            "news.example",
            ItemType::Subdocument,
        ));

        // Suppressed into the allowlisted document's row.
        assert_eq!(frame, PanelEvent::Updated { index: 0 });
        assert_eq!(panel.len(), 1);
        assert!(panel.records()[0].filter.as_ref().is_some_and(|f| f.allowlisted));
    }

    #[test]
    fn test_different_domain_is_a_different_record() {
        let mut panel = Panel::new();

        panel.record(RequestRecord::request(
            "https://ads.example/banner.png",
            "news.example",
            ItemType::Image,
        ));
        let other = panel.record(RequestRecord::request(
            "https://ads.example/banner.png",
            "blog.example",
            ItemType::Image,
        ));

        assert_eq!(other, PanelEvent::Added { index: 1 });
    }

    #[test]
    fn test_remove_and_reset() {
        let mut panel = Panel::new();
        panel.record(RequestRecord::request(
            "https://ads.example/a.png",
            "news.example",
            ItemType::Image,
        ));
        panel.record(RequestRecord::request(
            "https://ads.example/b.png",
            "news.example",
            ItemType::Image,
        ));

        assert!(panel.remove(5).is_none());
        let removed = panel.remove(0).expect("row");
        assert_eq!(removed.url.as_deref(), Some("https://ads.example/a.png"));
        assert_eq!(panel.len(), 1);

        panel.reset();
        assert!(panel.is_empty());
    }

    #[test]
    fn test_search_matches_url_selector_and_filter() {
        let mut panel = Panel::new();
        panel.record(RequestRecord::request(
            "https://ads.example/banner.png",
            "news.example",
            ItemType::Image,
        ));
        panel.record(RequestRecord::element_hiding("news.example", "#AD-box"));
        panel.record(
            RequestRecord::request("https://cdn.example/app.js", "news.example", ItemType::Script)
                .with_filter(FilterHit::blocking("||cdn.example/ad-loader")),
        );

        assert_eq!(panel.search("ad"), vec![0, 1, 2]);
        assert_eq!(panel.search("banner"), vec![0]);
        assert_eq!(panel.search("nothing"), Vec::<usize>::new());
    }

    #[test]
    fn test_panel_message_wire_shape() {
        let message = PanelMessage::UpdateRecord {
            index: 2,
            record: RequestRecord::request(
                "https://ads.example/banner.png",
                "news.example",
                ItemType::Image,
            ),
        };

        let wire = serde_json::to_value(&message).expect("serialize");
        assert_eq!(wire["type"], "update-record");
        assert_eq!(wire["index"], 2);
        assert_eq!(wire["record"]["itemType"], "IMAGE");

        let reset: PanelMessage =
            serde_json::from_value(json!({"type": "reset"})).expect("deserialize");
        assert_eq!(reset, PanelMessage::Reset);
    }

    #[test]
    fn test_panel_command_wire_shape() {
        let command: PanelCommand =
            serde_json::from_value(json!({"type": "performSearch", "query": "ads"}))
                .expect("deserialize");
        assert_eq!(
            command,
            PanelCommand::PerformSearch {
                query: "ads".into()
            }
        );
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(
            RequestRecord::domain_of("https://news.example/article?id=1"),
            Some("news.example".to_string())
        );
        assert_eq!(RequestRecord::domain_of("not a url"), None);
    }

    #[tokio::test]
    async fn test_bridge_streams_panel_messages() {
        let (connector, accepts) = memory::listener();
        let hub = MessageHub::new();
        hub.run(accepts);

        let manager = ConnectionManager::new("devtools-7", Arc::new(connector));
        let tab = TabId::new(7).unwrap();
        let (bridge, mut updates) = DevtoolsBridge::open(&manager, tab).await;

        // Wait for the subscription to land hub-side.
        for _ in 0..200 {
            if hub.subscription_count(REQUESTS_TOPIC) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let record = RequestRecord::request(
            "https://ads.example/banner.png",
            "news.example",
            ItemType::Image,
        );
        hub.publish_scoped(
            REQUESTS_TOPIC,
            HITS_ACTION,
            vec![serde_json::to_value(&record).expect("serialize")],
            Some(tab),
        );

        let message = updates.recv().await.expect("panel message");
        assert_eq!(message, PanelMessage::AddRecord { record });
        assert_eq!(bridge.record_count(), 1);

        hub.publish_scoped(REQUESTS_TOPIC, RESET_ACTION, vec![], Some(tab));
        let message = updates.recv().await.expect("panel message");
        assert_eq!(message, PanelMessage::Reset);
        assert_eq!(bridge.record_count(), 0);
    }
}
