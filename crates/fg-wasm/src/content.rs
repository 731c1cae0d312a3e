//! Content-script side: samples the live DOM into the detector.

use std::cell::Cell;

use js_sys::Reflect;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Document, DocumentFragment, Element, HtmlIFrameElement, HtmlMediaElement, Node};

use fg_core::detector::{collect_media, Metadata, MediaState, NodeKind, NodeSource, PageState, PlatformTable};
use fg_core::message::VideoChanged;
use fg_core::{DetectorConfig, Message, VideoChangeDetector};

use crate::{json_to_js, timestamp};

/// Attribute carrying the stable key of a tracked element.
const KEY_ATTR: &str = "data-focusgate-key";

const META_SELECTOR: &str = "meta[property], meta[name], meta[itemprop]";
const JSON_LD_SELECTOR: &str = "script[type=\"application/ld+json\"]";

// =============================================================================
// DOM Access
// =============================================================================

/// [`NodeSource`] over the live document. Elements get a numeric key stored
/// in a data attribute the first time they are seen.
struct DomSource<'a> {
    next_key: &'a Cell<u32>,
}

impl DomSource<'_> {
    fn key_of(&self, element: &Element) -> u32 {
        if let Some(key) = element.get_attribute(KEY_ATTR).and_then(|v| v.parse().ok()) {
            return key;
        }
        let key = self.next_key.get();
        self.next_key.set(key.wrapping_add(1));
        let _ = element.set_attribute(KEY_ATTR, &key.to_string());
        key
    }
}

impl NodeSource for DomSource<'_> {
    type Node = Node;

    fn descendants(&self, root: &Node) -> Vec<Node> {
        let list = if let Some(document) = root.dyn_ref::<Document>() {
            document.query_selector_all("*")
        } else if let Some(fragment) = root.dyn_ref::<DocumentFragment>() {
            fragment.query_selector_all("*")
        } else if let Some(element) = root.dyn_ref::<Element>() {
            element.query_selector_all("*")
        } else {
            return Vec::new();
        };

        let Ok(list) = list else {
            return Vec::new();
        };
        (0..list.length()).filter_map(|i| list.item(i)).collect()
    }

    fn shadow_root(&self, node: &Node) -> Option<Node> {
        node.dyn_ref::<Element>()?.shadow_root().map(Node::from)
    }

    fn kind(&self, node: &Node) -> NodeKind {
        if let Some(media) = node.dyn_ref::<HtmlMediaElement>() {
            return NodeKind::Media(self.key_of(media), media_state(media));
        }
        if let Some(frame) = node.dyn_ref::<HtmlIFrameElement>() {
            return NodeKind::Iframe(self.key_of(frame), frame.src());
        }
        NodeKind::Other
    }
}

fn media_state(media: &HtmlMediaElement) -> MediaState {
    let current = media.current_src();
    MediaState {
        src: if current.is_empty() { media.src() } else { current },
        current_time: media.current_time(),
        paused: media.paused(),
        duration: media.duration(),
        title_attr: media.get_attribute("title"),
        aria_label: media.get_attribute("aria-label"),
        parent_title: media.parent_element().and_then(|p| p.get_attribute("title")),
    }
}

fn read_page(document: &Document, platforms: &PlatformTable) -> PageState {
    let url = document.location().and_then(|l| l.href().ok()).unwrap_or_default();

    let mut tags = Vec::new();
    if let Ok(list) = document.query_selector_all(META_SELECTOR) {
        for node in (0..list.length()).filter_map(|i| list.item(i)) {
            let Some(meta) = node.dyn_ref::<Element>() else { continue };
            let property = meta
                .get_attribute("property")
                .or_else(|| meta.get_attribute("name"))
                .or_else(|| meta.get_attribute("itemprop"));
            if let (Some(property), Some(content)) = (property, meta.get_attribute("content")) {
                tags.push((property, content));
            }
        }
    }

    let mut scripts = Vec::new();
    if let Ok(list) = document.query_selector_all(JSON_LD_SELECTOR) {
        scripts.extend((0..list.length()).filter_map(|i| list.item(i)?.text_content()));
    }

    let platform_title = platforms
        .title_selector(&url)
        .and_then(|selector| document.query_selector(selector).ok().flatten())
        .and_then(|el| el.text_content())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());

    PageState {
        title: document.title(),
        metadata: Metadata::extract(
            tags.iter().map(|(p, c)| (p.as_str(), c.as_str())),
            scripts.iter().map(String::as_str),
        ),
        platform_title,
        url,
    }
}

fn change_to_js(change: Option<VideoChanged>) -> JsValue {
    match change {
        Some(change) => json_to_js(&Message::VideoChanged(change).to_json()),
        None => JsValue::NULL,
    }
}

// =============================================================================
// Monitor
// =============================================================================

/// Video-change detection for one browsing context.
///
/// The host wires `play`/`playing`/`loadstart`/`loadedmetadata`/`durationchange`/
/// `emptied`/`timeupdate` listeners to [`on_media_event`](Self::on_media_event),
/// runs [`scan`](Self::scan) every [`next_scan_delay`](Self::next_scan_delay)
/// ms, and forwards every returned message with `chrome.runtime.sendMessage`.
#[wasm_bindgen]
pub struct ContentMonitor {
    document: Document,
    detector: VideoChangeDetector,
    next_key: Cell<u32>,
}

impl ContentMonitor {
    fn page(&self) -> PageState {
        read_page(&self.document, self.detector.platforms())
    }
}

#[wasm_bindgen]
impl ContentMonitor {
    #[wasm_bindgen(constructor)]
    pub fn new(now: Option<f64>) -> Result<ContentMonitor, JsValue> {
        let document = web_sys::window()
            .and_then(|w| w.document())
            .ok_or_else(|| JsValue::from_str("No document in this context"))?;
        let platforms = PlatformTable::default();
        let page = read_page(&document, &platforms);
        let detector = VideoChangeDetector::new(DetectorConfig::default(), &page, timestamp(now)).with_platforms(platforms);
        Ok(ContentMonitor {
            document,
            detector,
            next_key: Cell::new(1),
        })
    }

    /// Walk the document and every shadow root. Returns the messages to send.
    pub fn scan(&mut self, now: Option<f64>) -> JsValue {
        let source = DomSource {
            next_key: &self.next_key,
        };
        let root: Node = self.document.clone().into();
        let discovered = collect_media(&source, &root);
        let page = self.page();

        let messages = js_sys::Array::new();
        for message in self.detector.sync(&discovered, &page, timestamp(now)) {
            messages.push(&json_to_js(&message.to_json()));
        }
        messages.into()
    }

    /// A media element fired an event. Returns a `VIDEO_CHANGED` message or
    /// `null`.
    pub fn on_media_event(&mut self, element: &HtmlMediaElement, now: Option<f64>) -> JsValue {
        let source = DomSource {
            next_key: &self.next_key,
        };
        let key = source.key_of(element);
        let page = self.page();
        change_to_js(
            self.detector
                .on_media_event(key, &media_state(element), &page, timestamp(now)),
        )
    }

    /// An iframe's `src` attribute changed.
    pub fn on_iframe(&mut self, element: &HtmlIFrameElement, now: Option<f64>) -> JsValue {
        let source = DomSource {
            next_key: &self.next_key,
        };
        let key = source.key_of(element);
        let page = self.page();
        change_to_js(self.detector.on_iframe(key, &element.src(), &page, timestamp(now)))
    }

    /// `popstate`, `hashchange`, or a title/metadata mutation.
    pub fn on_page_check(&mut self, now: Option<f64>) -> JsValue {
        let page = self.page();
        change_to_js(self.detector.on_page_check(&page, timestamp(now)))
    }

    /// `AUDIO_STATUS_CHANGED` from the background. Returns
    /// `{ message, rescan }`.
    pub fn on_audio_status(&mut self, is_audible: bool, now: Option<f64>) -> JsValue {
        let page = self.page();
        let reaction = self.detector.on_audio_status(is_audible, &page, timestamp(now));
        let result = js_sys::Object::new();
        let _ = Reflect::set(&result, &"message".into(), &change_to_js(reaction.change));
        let _ = Reflect::set(&result, &"rescan".into(), &JsValue::from(reaction.rescan));
        result.into()
    }

    /// Timer housekeeping; call on every scan tick.
    pub fn tick(&mut self, now: Option<f64>) -> JsValue {
        let page = self.page();
        change_to_js(self.detector.tick(&page, timestamp(now)))
    }

    pub fn next_scan_delay(&self, now: Option<f64>) -> f64 {
        self.detector.next_scan_delay(timestamp(now)) as f64
    }

    pub fn change_count(&self) -> u32 {
        self.detector.change_count()
    }

    /// Media elements currently tracked, shadow roots included.
    pub fn media_count(&self) -> usize {
        self.detector.media_count()
    }

    /// `beforeunload`.
    pub fn unload(&mut self, now: Option<f64>) {
        self.detector.unload(timestamp(now));
    }
}
