use std::rc::Rc;
use std::time::Duration;

use bindery::{BindContext, BindError, CollectingSink, Directive, Phase, ResolutionError};
use bindery_core::{Element, Model, ModelRc, Node, ObjectModel};
use pretty_assertions::assert_eq;
use serde_json::json;

struct Page {
    ctx: BindContext,
    doc: Rc<Node>,
    sink: Rc<CollectingSink>,
}

fn page() -> Page {
    let sink = Rc::new(CollectingSink::new());
    let doc = Node::document();
    let ctx = BindContext::builder()
        .error_sink(sink.clone())
        .document(doc.as_element())
        .build();
    Page { ctx, doc, sink }
}

impl Page {
    /// Mount `<bind-value attrs...><child/></bind-value>` and connect a
    /// directive to it.
    fn bind(&self, attrs: &[(&str, &str)], child: &Rc<Node>) -> (Rc<Node>, Directive) {
        let wrapper = Node::wrapper("bind-value");
        for (name, value) in attrs {
            Element::set_attribute(&*wrapper, name, value);
        }
        wrapper.append_child(child);
        self.doc.append_child(&wrapper);
        let directive = Directive::new(&self.ctx, wrapper.as_element());
        directive.connected();
        (wrapper, directive)
    }

    fn model(&self, name: &str, data: serde_json::Value) -> ModelRc {
        let model: ModelRc = ObjectModel::new(data);
        self.ctx.globals().define_instance(name, Rc::clone(&model));
        model
    }

    fn flush(&self) {
        self.ctx.event_loop().run_until_idle();
    }
}

#[test]
fn greeting_follows_update() {
    let p = page();
    let model = p.model("greeter", json!({"greeting": "Hello"}));
    let input = Node::new("input");
    let (_, d) = p.bind(&[("model", "greeter"), ("property", "greeting")], &input);
    p.flush();
    assert_eq!(d.phase(), Phase::Active);
    assert_eq!(input.value(), "Hello");

    p.ctx.update(&model, "greeting", &json!("World"));
    assert_eq!(input.value(), "Hello");
    p.flush();
    assert_eq!(input.value(), "World");
}

#[test]
fn deferred_update_reaches_text_content() {
    let p = page();
    let model = p.model("counter", json!({"value": 0}));
    let span = Node::new("span");
    p.bind(
        &[("model", "counter"), ("property", "value"), ("elem-attr", "textContent")],
        &span,
    );
    p.flush();
    assert_eq!(span.text(), "0");

    model.set("value", json!(100)).unwrap();
    p.ctx.update_defer(&model, "value", Duration::from_millis(30));
    p.ctx.event_loop().advance(Duration::from_millis(29));
    assert_eq!(span.text(), "0");
    p.ctx.event_loop().advance(Duration::from_millis(1));
    assert_eq!(span.text(), "100");
}

#[test]
fn typing_writes_the_model_and_fans_out() {
    let p = page();
    let model = p.model("form", json!({"name": "ada"}));
    let first = Node::new("input");
    let second = Node::new("input");
    p.bind(&[("model", "form"), ("property", "name")], &first);
    let (_, mirror) = p.bind(&[("model", "form"), ("property", "name")], &second);
    p.flush();
    let writes_before = mirror.element_writes();

    first.input("grace");
    assert_eq!(model.get("name"), Some(json!("grace")));
    p.flush();
    assert_eq!(second.value(), "grace");
    assert_eq!(mirror.element_writes(), writes_before + 1);
}

#[test]
fn loosely_equal_input_skips_the_model_write() {
    let p = page();
    let model = p.model("m", json!({"n": 5}));
    let input = Node::new("input");
    p.bind(&[("model", "m"), ("property", "n")], &input);
    p.flush();

    input.input("5");
    assert_eq!(model.get("n"), Some(json!(5)));
    input.input("6");
    assert_eq!(model.get("n"), Some(json!("6")));
}

#[test]
fn push_never_writes_back() {
    let p = page();
    let model = p.model("m", json!({"name": "a"}));
    let input = Node::new("input");
    let (_, d) = p.bind(&[("model", "m"), ("property", "name"), ("push", "")], &input);
    p.flush();
    assert_eq!(input.value(), "");
    assert_eq!(p.ctx.observer().subscriber_count(&model, "name"), 0);

    input.input("b");
    assert_eq!(model.get("name"), Some(json!("b")));

    assert_eq!(p.ctx.update(&model, "name", &json!("c")), 0);
    p.flush();
    assert_eq!(input.value(), "b");
    assert_eq!(d.element_writes(), 0);
}

#[test]
fn pull_never_writes_the_model() {
    let p = page();
    let model = p.model("m", json!({"name": "a"}));
    let input = Node::new("input");
    p.bind(&[("model", "m"), ("property", "name"), ("pull", "")], &input);
    p.flush();
    assert_eq!(input.value(), "a");
    assert_eq!(input.listener_count(), 0);

    input.input("typed");
    assert_eq!(model.get("name"), Some(json!("a")));

    p.ctx.update(&model, "name", &json!("x"));
    p.flush();
    assert_eq!(input.value(), "x");
}

#[test]
fn once_writes_a_single_time() {
    let p = page();
    let model = p.model("m", json!({"n": 1}));
    let input = Node::new("input");
    let (_, d) = p.bind(&[("model", "m"), ("property", "n"), ("once", "")], &input);
    p.flush();
    assert_eq!(input.value(), "1");

    for n in 2..5 {
        p.ctx.update(&model, "n", &json!(n));
        p.flush();
    }
    assert_eq!(input.value(), "1");
    assert_eq!(d.element_writes(), 1);
}

#[test]
fn output_rate_limit_is_leading_edge_with_one_trailing_write() {
    let p = page();
    let model = p.model("m", json!({"n": 1}));
    let input = Node::new("input");
    p.bind(&[("model", "m"), ("property", "n"), ("throttle", "100")], &input);
    p.flush();

    p.ctx.update(&model, "n", &json!(2));
    p.flush();
    assert_eq!(input.value(), "2");

    p.ctx.update(&model, "n", &json!(3));
    p.ctx.update(&model, "n", &json!(4));
    p.flush();
    assert_eq!(input.value(), "2");
    assert_eq!(p.ctx.event_loop().pending_timers(), 1);

    p.ctx.event_loop().advance(Duration::from_millis(100));
    assert_eq!(input.value(), "4");
}

#[test]
fn input_debounce_is_trailing() {
    let p = page();
    let model = p.model("m", json!({"q": ""}));
    let input = Node::new("input");
    p.bind(&[("model", "m"), ("property", "q"), ("throttle", "50")], &input);
    p.flush();

    input.input("r");
    p.ctx.event_loop().advance(Duration::from_millis(20));
    input.input("ru");
    p.ctx.event_loop().advance(Duration::from_millis(49));
    assert_eq!(model.get("q"), Some(json!("")));
    p.ctx.event_loop().advance(Duration::from_millis(1));
    assert_eq!(model.get("q"), Some(json!("ru")));
}

#[test]
fn multi_select_reports_selection_in_control_order() {
    let p = page();
    let model = p.model("m", json!({"tags": ["b"]}));
    let select = Node::new("select")
        .with_attr("multiple", "")
        .with_option("a", false)
        .with_option("b", false)
        .with_option("c", false);
    p.bind(&[("model", "m"), ("property", "tags")], &select);
    p.flush();
    let selected: Vec<bool> = select.options().iter().map(|o| o.selected).collect();
    assert_eq!(selected, vec![false, true, false]);

    select.choose(0, true);
    assert_eq!(model.get("tags"), Some(json!(["a", "b"])));
    select.choose(2, true);
    assert_eq!(model.get("tags"), Some(json!(["a", "b", "c"])));

    p.ctx.update(&model, "tags", &json!("c"));
    p.flush();
    let selected: Vec<bool> = select.options().iter().map(|o| o.selected).collect();
    assert_eq!(selected, vec![false, false, true]);
}

#[test]
fn checkbox_round_trip() {
    let p = page();
    let model = p.model("m", json!({"agree": false}));
    let check = Node::new("input")
        .with_attr("type", "checkbox")
        .with_attr("value", "yes");
    p.bind(&[("model", "m"), ("property", "agree")], &check);
    p.flush();

    check.toggle(true);
    assert_eq!(model.get("agree"), Some(json!("yes")));
    check.toggle(false);
    assert_eq!(model.get("agree"), Some(json!(false)));

    p.ctx.update(&model, "agree", &json!(true));
    p.flush();
    assert_eq!(check.property("checked"), Some(json!(true)));
}

#[test]
fn element_models_and_model_attributes() {
    let p = page();
    let panel = Node::new("div").with_id("panel").with_attr("data-state", "closed");
    p.doc.append_child(&panel);
    let input = Node::new("input");
    p.bind(&[("model", "#panel"), ("model-attr", "data-state")], &input);
    p.flush();
    assert_eq!(input.value(), "closed");

    input.input("open");
    assert_eq!(panel.attribute("data-state").as_deref(), Some("open"));
}

#[test]
fn property_change_rewires() {
    let p = page();
    let model = p.model("m", json!({"a": "first", "b": "second"}));
    let input = Node::new("input");
    let (wrapper, d) = p.bind(&[("model", "m"), ("property", "a")], &input);
    p.flush();
    assert_eq!(input.value(), "first");

    Element::set_attribute(&*wrapper, "property", "b");
    d.attribute_changed("property");
    p.flush();
    assert_eq!(d.phase(), Phase::Active);
    assert_eq!(input.value(), "second");
    assert_eq!(p.ctx.observer().subscriber_count(&model, "a"), 0);
    assert_eq!(p.ctx.observer().subscriber_count(&model, "b"), 1);
    assert_eq!(input.listener_count(), 1);
}

#[test]
fn throttle_change_updates_in_place() {
    let p = page();
    let model = p.model("m", json!({"a": 1}));
    let input = Node::new("input");
    let (wrapper, d) = p.bind(&[("model", "m"), ("property", "a")], &input);
    p.flush();
    let writes = d.element_writes();

    Element::set_attribute(&*wrapper, "throttle", "250");
    d.attribute_changed("throttle");
    assert_eq!(d.config().throttle, Some(Duration::from_millis(250)));
    assert_eq!(d.phase(), Phase::Active);
    p.flush();
    assert_eq!(d.element_writes(), writes);
    assert_eq!(p.ctx.observer().subscriber_count(&model, "a"), 1);

    d.attribute_changed("class");
    assert_eq!(d.phase(), Phase::Active);
}

#[test]
fn configuration_error_recovers_on_change() {
    let p = page();
    p.model("m", json!({"x": "ok"}));
    let input = Node::new("input");
    let (wrapper, d) = p.bind(&[("property", "x")], &input);
    assert_eq!(d.phase(), Phase::Aborted);
    assert!(matches!(p.sink.take()[..], [BindError::Configuration(_)]));

    Element::set_attribute(&*wrapper, "model", "m");
    d.attribute_changed("model");
    p.flush();
    assert_eq!(d.phase(), Phase::Active);
    assert_eq!(input.value(), "ok");
    assert!(p.sink.errors().is_empty());
}

#[test]
fn remote_model_paths_are_refused() {
    let p = page();
    let input = Node::new("input");
    let (_, d) = p.bind(
        &[("model", "https://cdn.example/model.js"), ("property", "x")],
        &input,
    );
    assert_eq!(d.phase(), Phase::Aborted);
    assert!(matches!(
        p.sink.take()[..],
        [BindError::Resolution(ResolutionError::RemotePath(_))]
    ));
    assert_eq!(input.listener_count(), 0);
}

#[test]
fn global_functions_receive_the_interaction() {
    let p = page();
    p.model("m", json!({}));
    let seen = Rc::new(std::cell::RefCell::new(None));
    let s = Rc::clone(&seen);
    p.ctx
        .globals()
        .define_function("actions.save", move |i| *s.borrow_mut() = Some(i.clone()));
    let input = Node::new("input").with_id("title");
    p.bind(&[("model", "m"), ("func", "actions.save")], &input);

    input.input("draft");
    let interaction = seen.borrow().clone().unwrap();
    assert_eq!(interaction.event, "input");
    assert_eq!(interaction.value, json!("draft"));
    assert_eq!(interaction.target_id.as_deref(), Some("title"));
}

#[test]
fn removed_targets_are_not_written() {
    let p = page();
    let model = p.model("m", json!({"n": 1}));
    let input = Node::new("input");
    let (wrapper, d) = p.bind(&[("model", "m"), ("property", "n")], &input);
    p.flush();

    p.ctx.update(&model, "n", &json!(2));
    wrapper.remove();
    p.flush();
    assert_eq!(input.value(), "1");
    assert_eq!(d.element_writes(), 1);
}

#[test]
fn late_notifications_after_disconnect_are_dropped() {
    let p = page();
    let model = p.model("m", json!({"n": 1}));
    let input = Node::new("input");
    let (_, d) = p.bind(&[("model", "m"), ("property", "n"), ("throttle", "100")], &input);
    p.flush();
    p.ctx.update(&model, "n", &json!(2));
    p.ctx.update(&model, "n", &json!(3));
    d.disconnected();

    p.ctx.event_loop().advance(Duration::from_millis(200));
    assert_eq!(p.ctx.event_loop().pending_timers(), 0);
    assert_eq!(input.value(), "1");
}

#[test]
fn pending_input_debounce_is_cleared_on_disconnect() {
    let p = page();
    let model = p.model("m", json!({"q": ""}));
    let input = Node::new("input");
    let (_, d) = p.bind(&[("model", "m"), ("property", "q"), ("throttle", "50")], &input);
    p.flush();

    input.input("half-typed");
    assert_eq!(p.ctx.event_loop().pending_timers(), 1);
    d.disconnected();
    assert_eq!(p.ctx.event_loop().pending_timers(), 0);

    p.ctx.event_loop().advance(Duration::from_millis(100));
    assert_eq!(model.get("q"), Some(json!("")));
}

#[test]
fn rewiring_under_the_same_model_key_keeps_the_instance() {
    let p = page();
    p.ctx.globals().define_constructor("Store", || {
        ObjectModel::new(json!({"a": "", "b": "beta"})) as ModelRc
    });
    let input = Node::new("input");
    let (wrapper, d) = p.bind(&[("model", "Store"), ("property", "a")], &input);
    p.flush();
    let before = d.model().unwrap();
    input.input("typed");
    assert_eq!(before.get("a"), Some(json!("typed")));

    Element::set_attribute(&*wrapper, "property", "b");
    d.attribute_changed("property");
    p.flush();
    let after = d.model().unwrap();
    assert!(Rc::ptr_eq(&before, &after));
    assert_eq!(after.get("a"), Some(json!("typed")));
    assert_eq!(p.ctx.loader().ref_count("Store"), 1);
    assert_eq!(input.value(), "beta");
}

#[test]
fn replacing_the_model_key_releases_the_old_one() {
    let p = page();
    p.ctx
        .globals()
        .define_constructor("Draft", || ObjectModel::new(json!({"t": "draft"})) as ModelRc);
    p.ctx
        .globals()
        .define_constructor("Final", || ObjectModel::new(json!({"t": "final"})) as ModelRc);
    let input = Node::new("input");
    let (wrapper, d) = p.bind(&[("model", "Draft"), ("property", "t")], &input);
    p.flush();
    assert_eq!(p.ctx.loader().ref_count("Draft"), 1);

    Element::set_attribute(&*wrapper, "model", "Final");
    d.attribute_changed("model");
    p.flush();
    assert_eq!(p.ctx.loader().ref_count("Draft"), 0);
    assert!(!p.ctx.loader().is_cached("Draft"));
    assert_eq!(p.ctx.loader().ref_count("Final"), 1);
    assert_eq!(input.value(), "final");
}
