//! dom binding for a plain html page (wasm only, no bevy app).
//!
//! expects the page to already contain the controls, by id (see `PageIds`):
//! an endpoint `<input>` + save button + label, a transcript container,
//! and a `<form>` with a prompt `<input>` and a submit button.
//!
//! `?api=<url>` on the page url overrides the endpoint; the page origin is the default.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{Document, Element, Event, HtmlButtonElement, HtmlElement, HtmlInputElement, Window};

use crate::config::ChatClientConfig;
use crate::endpoint::Endpoint;
use crate::session::{ChatController, ChatView};
use crate::store::{KvStore, LocalStorage};
use crate::transcript::Turn;
use crate::transport::{HttpTransport, Transport};

/// element ids the binding looks up.
#[derive(Debug, Clone)]
pub struct PageIds {
    pub endpoint_input: String,
    pub endpoint_label: String,
    pub endpoint_save: String,
    pub messages: String,
    pub composer: String,
    pub prompt: String,
    pub send: String,
}

impl Default for PageIds {
    fn default() -> Self {
        Self {
            endpoint_input: "apiBase".into(),
            endpoint_label: "apiLabel".into(),
            endpoint_save: "saveApi".into(),
            messages: "messages".into(),
            composer: "composer".into(),
            prompt: "prompt".into(),
            send: "send".into(),
        }
    }
}

fn by_id<T: JsCast>(document: &Document, id: &str) -> Result<T, JsValue> {
    document
        .get_element_by_id(id)
        .ok_or_else(|| JsValue::from_str(&format!("missing element #{id}")))?
        .dyn_into::<T>()
        .map_err(|_| JsValue::from_str(&format!("#{id} has an unexpected element type")))
}

/// `ChatView` over real dom nodes. text goes through `textContent`, never `innerHTML`.
struct DomView {
    document: Document,
    endpoint_input: HtmlInputElement,
    endpoint_label: HtmlElement,
    messages: Element,
    prompt: HtmlInputElement,
    send: HtmlButtonElement,
}

impl DomView {
    fn bind(document: &Document, ids: &PageIds) -> Result<Self, JsValue> {
        Ok(Self {
            document: document.clone(),
            endpoint_input: by_id(document, &ids.endpoint_input)?,
            endpoint_label: by_id(document, &ids.endpoint_label)?,
            messages: by_id(document, &ids.messages)?,
            prompt: by_id(document, &ids.prompt)?,
            send: by_id(document, &ids.send)?,
        })
    }
}

impl ChatView for DomView {
    fn append_turn(&mut self, turn: &Turn) {
        let Ok(el) = self.document.create_element("div") else { return };
        el.set_class_name(&format!("msg {}", turn.role));
        el.set_text_content(Some(&turn.text));
        if self.messages.append_child(&el).is_ok() {
            self.messages.set_scroll_top(self.messages.scroll_height());
        }
    }

    fn show_endpoint(&mut self, endpoint: &Endpoint) {
        self.endpoint_input.set_value(endpoint.as_str());
        self.endpoint_label.set_text_content(Some(endpoint.as_str()));
    }

    fn clear_prompt(&mut self) {
        self.prompt.set_value("");
    }

    fn set_send_enabled(&mut self, enabled: bool) {
        self.send.set_disabled(!enabled);
    }

    fn focus_prompt(&mut self) {
        let _ = self.prompt.focus();
    }
}

struct Page {
    controller: RefCell<ChatController>,
    view: RefCell<DomView>,
    store: Arc<dyn KvStore>,
    transport: Arc<dyn Transport>,
}

impl Page {
    fn render(&self) {
        self.controller.borrow_mut().flush(&mut *self.view.borrow_mut());
    }

    fn submit(self: Rc<Self>) {
        let text = self.view.borrow().prompt.value();
        let request = self.controller.borrow_mut().submit(&text);
        self.render();
        let Some(request) = request else { return };

        let endpoint = self.controller.borrow().endpoint().clone();
        wasm_bindgen_futures::spawn_local(async move {
            // no borrow is held across this await
            let outcome = self.transport.send(&endpoint, &request).await;
            self.controller.borrow_mut().settle(outcome);
            self.render();
        });
    }

    fn save_endpoint(&self) {
        let raw = self.view.borrow().endpoint_input.value();
        if self.controller.borrow_mut().save_endpoint(self.store.as_ref(), &raw) {
            self.render();
        }
    }
}

/// `protocol//host` of the current page.
pub fn page_origin(window: &Window) -> Result<String, JsValue> {
    let location = window.location();
    Ok(format!("{}//{}", location.protocol()?, location.host()?))
}

/// value of the `api` query parameter, if any.
pub fn query_override(window: &Window) -> Option<String> {
    let search = window.location().search().ok()?;
    web_sys::UrlSearchParams::new_with_str(&search).ok()?.get("api")
}

/// wire the chat controls of the current page. call once after the dom is loaded.
pub fn mount(config: ChatClientConfig, ids: &PageIds) -> Result<(), JsValue> {
    let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
    let document = window.document().ok_or_else(|| JsValue::from_str("no document"))?;

    let mut config = config;
    config.default_origin = page_origin(&window)?;
    if let Some(api) = query_override(&window) {
        config.endpoint_override = Some(api);
    }

    let store: Arc<dyn KvStore> = Arc::new(LocalStorage);
    let controller = ChatController::bootstrap(&config, store.as_ref())
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    let page = Rc::new(Page {
        controller: RefCell::new(controller),
        view: RefCell::new(DomView::bind(&document, ids)?),
        store,
        transport: Arc::new(HttpTransport::new(&config)),
    });
    page.render();

    let form: Element = by_id(&document, &ids.composer)?;
    let on_submit = {
        let page = page.clone();
        Closure::<dyn FnMut(Event)>::new(move |ev: Event| {
            ev.prevent_default();
            page.clone().submit();
        })
    };
    form.add_event_listener_with_callback("submit", on_submit.as_ref().unchecked_ref())?;
    // page-lifetime listeners
    on_submit.forget();

    let save: Element = by_id(&document, &ids.endpoint_save)?;
    let on_save = {
        let page = page.clone();
        Closure::<dyn FnMut(Event)>::new(move |_ev: Event| page.save_endpoint())
    };
    save.add_event_listener_with_callback("click", on_save.as_ref().unchecked_ref())?;
    on_save.forget();

    Ok(())
}

/// js entry point: `import init, { start_chat } from "./pkg/bevy_web_chat.js"`.
#[wasm_bindgen(js_name = start_chat)]
pub fn start_chat() -> Result<(), JsValue> {
    console_error_panic_hook::set_once();
    mount(ChatClientConfig::default(), &PageIds::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::transcript::Role;
    use crate::transport::ChatResponse;
    use crate::transport::mock::ScriptedTransport;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    /// adds the chat controls under `prefix`-ed ids, so tests sharing a page don't collide.
    fn fixture(prefix: &str) -> (Document, PageIds) {
        let document = web_sys::window().unwrap().document().unwrap();
        let ids = PageIds {
            endpoint_input: format!("{prefix}-api"),
            endpoint_label: format!("{prefix}-label"),
            endpoint_save: format!("{prefix}-save"),
            messages: format!("{prefix}-messages"),
            composer: format!("{prefix}-composer"),
            prompt: format!("{prefix}-prompt"),
            send: format!("{prefix}-send"),
        };
        let root = document.create_element("div").unwrap();
        root.set_inner_html(&format!(
            r#"<input id="{}"><button id="{}">save</button><span id="{}"></span>
               <div id="{}"></div>
               <form id="{}"><input id="{}"><button id="{}">send</button></form>"#,
            ids.endpoint_input, ids.endpoint_save, ids.endpoint_label, ids.messages, ids.composer, ids.prompt, ids.send,
        ));
        document.body().unwrap().append_child(&root).unwrap();
        (document, ids)
    }

    #[wasm_bindgen_test]
    fn turns_render_as_text_not_markup() {
        let (document, ids) = fixture("markup");
        let mut view = DomView::bind(&document, &ids).unwrap();

        let body = "<img src=x onerror=alert(1)><b>boom</b>";
        view.append_turn(&Turn { index: 0, role: Role::Assistant, text: format!("Error: 500 {body}") });

        assert_eq!(view.messages.child_element_count(), 1);
        let turn = view.messages.first_element_child().unwrap();
        assert_eq!(turn.class_name(), "msg assistant");
        assert_eq!(turn.child_element_count(), 0);
        assert_eq!(turn.text_content().as_deref(), Some(format!("Error: 500 {body}").as_str()));
        assert!(turn.inner_html().contains("&lt;b&gt;boom&lt;/b&gt;"));
    }

    #[wasm_bindgen_test]
    fn view_calls_drive_the_controls() {
        let (document, ids) = fixture("controls");
        let mut view = DomView::bind(&document, &ids).unwrap();

        view.show_endpoint(&Endpoint::new("http://core:9000"));
        assert_eq!(view.endpoint_input.value(), "http://core:9000");
        assert_eq!(view.endpoint_label.text_content().as_deref(), Some("http://core:9000"));

        view.prompt.set_value("draft");
        view.clear_prompt();
        assert_eq!(view.prompt.value(), "");

        view.set_send_enabled(false);
        assert!(view.send.disabled());
        view.set_send_enabled(true);
        assert!(!view.send.disabled());
    }

    #[wasm_bindgen_test]
    fn submit_renders_user_turn_and_disables_send_before_the_reply() {
        let (document, ids) = fixture("submit");
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let config = ChatClientConfig::default();
        let page = Rc::new(Page {
            controller: RefCell::new(ChatController::bootstrap(&config, store.as_ref()).unwrap()),
            view: RefCell::new(DomView::bind(&document, &ids).unwrap()),
            store,
            transport: Arc::new(ScriptedTransport::replying([Ok(ChatResponse::with_parts(["hi"]))])),
        });
        page.render();

        page.view.borrow().prompt.set_value("  hello  ");
        page.clone().submit();

        let view = page.view.borrow();
        assert!(view.send.disabled());
        assert_eq!(view.prompt.value(), "");
        assert_eq!(view.messages.child_element_count(), 1);
        let turn = view.messages.first_element_child().unwrap();
        assert_eq!(turn.class_name(), "msg user");
        assert_eq!(turn.text_content().as_deref(), Some("hello"));
    }

    #[wasm_bindgen_test]
    fn blank_endpoint_save_leaves_the_page_alone() {
        let (document, ids) = fixture("save");
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let config = ChatClientConfig::default().with_origin("http://origin:1");
        let page = Page {
            controller: RefCell::new(ChatController::bootstrap(&config, store.as_ref()).unwrap()),
            view: RefCell::new(DomView::bind(&document, &ids).unwrap()),
            store: store.clone(),
            transport: Arc::new(ScriptedTransport::default()),
        };
        page.render();

        page.view.borrow().endpoint_input.set_value("   ");
        page.save_endpoint();
        assert_eq!(store.get("CORE_API_BASE"), None);
        assert_eq!(page.view.borrow().messages.child_element_count(), 0);

        page.view.borrow().endpoint_input.set_value("http://core:9000");
        page.save_endpoint();
        assert_eq!(store.get("CORE_API_BASE").as_deref(), Some("http://core:9000"));
        let view = page.view.borrow();
        assert_eq!(view.endpoint_label.text_content().as_deref(), Some("http://core:9000"));
        assert_eq!(
            view.messages.first_element_child().unwrap().text_content().as_deref(),
            Some("API changed: http://core:9000")
        );
    }
}
