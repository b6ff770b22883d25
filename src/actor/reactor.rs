//! The reactor owns the service and answers every request on the main loop.
//!
//! Other threads only talk to it through [`Event`]s; replies travel back on
//! a oneshot channel carried by the request.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

use crate::actor::Receiver;
use crate::common::collections::HashMap;
use crate::common::config::Config;
use crate::ipc::{ClientId, Request, Response, SharedServerState};
use crate::remote::{LocalBus, RemoteRef, SimpleActionGroup, SimpleLegacyMenu, SimpleMenu};
use crate::service::HudService;
use crate::source::Subscription;
use crate::sys::main_loop;

pub type Sender = crate::actor::Sender<Event>;

#[derive(Debug)]
pub enum Event {
    ClientConnected(ClientId),
    ClientDisconnected(ClientId),
    Request {
        client: ClientId,
        request: Request,
        reply: oneshot::Sender<Response>,
    },
    ConfigUpdated(Box<Config>),
    /// Periodic heartbeat from the socket thread. Drives timers.
    Tick,
    Shutdown,
}

pub struct Reactor {
    service: Rc<HudService>,
    bus: Rc<LocalBus>,
    server: SharedServerState,
    // action groups clients published through us, for enable/disable
    groups: RefCell<HashMap<RemoteRef, Rc<SimpleActionGroup>>>,
    _broadcast: Subscription,
}

impl Reactor {
    pub fn new(service: Rc<HudService>, bus: Rc<LocalBus>, server: SharedServerState) -> Self {
        let state = server.clone();
        let broadcast = service.events().connect(move |event| state.read().publish(event));
        Self {
            service,
            bus,
            server,
            groups: RefCell::new(HashMap::default()),
            _broadcast: broadcast,
        }
    }

    pub fn service(&self) -> &Rc<HudService> { &self.service }

    /// Handles events until [`Event::Shutdown`] or until every sender is gone.
    pub async fn run(&self, mut events: Receiver<Event>) {
        while let Some((span, event)) = events.recv().await {
            let keep_going = span.in_scope(|| self.handle_event(event));
            if !keep_going {
                break;
            }
            // let queued refreshes run before the next request
            if main_loop::has_pending() {
                main_loop::yield_now().await;
            }
        }
        info!("reactor stopped");
    }

    /// Returns false once the reactor should stop.
    pub fn handle_event(&self, event: Event) -> bool {
        match event {
            Event::ClientConnected(client) => {
                debug!(%client, "client connected");
                self.bus.claim_name(client.as_str());
            }
            Event::ClientDisconnected(client) => {
                debug!(%client, "client disconnected");
                self.client_gone(client.as_str());
            }
            Event::Request { client, request, reply } => {
                let response = self.handle_request(&client, request);
                if reply.send(response).is_err() {
                    debug!(%client, "client left before the reply");
                }
            }
            Event::ConfigUpdated(config) => {
                if let Err(e) = self.service.context().apply(&config) {
                    warn!("ignoring config update: {e:#}");
                }
            }
            Event::Tick => self.service.expire_legacy(Instant::now()),
            Event::Shutdown => {
                info!("shutdown requested");
                return false;
            }
        }
        true
    }

    fn client_gone(&self, name: &str) {
        self.groups.borrow_mut().retain(|at, _| at.bus_name != name);
        self.bus.release_name(name);
        self.service.client_vanished(name);
    }

    #[instrument(skip(self, request), fields(method = request_name(&request)))]
    pub fn handle_request(&self, client: &ClientId, request: Request) -> Response {
        if let Some(event) = request.focus_event() {
            return self.service.handle_focus(event).into();
        }
        let service = &self.service;
        match request {
            Request::CreateQuery { search } => Response::ok(service.create_query(&search, Some(client.as_str()))),
            Request::StartQuery { search, entries } => {
                let (target, suggestions, key) = service.start_query(client.as_str(), &search, entries);
                Response::ok(json!({ "target": target, "suggestions": suggestions, "query_key": key }))
            }
            Request::CloseQuery { key } => service.close_legacy_query(client.as_str(), key, Instant::now()).into(),
            Request::ExecuteQuery { key, timestamp } => {
                service.execute_query(client.as_str(), key, timestamp).into()
            }
            Request::RegisterApplication { app_id } => service.register_application(&app_id).into(),
            Request::GetOpenQueries => Response::ok(service.open_queries()),
            Request::GetApplications => Response::ok(service.applications()),
            Request::DumpApplication { application } => service.dump_application(&application).into(),

            Request::UpdateQuery { query, search } => {
                service.query(&query).map(|q| q.update_search(&search)).into()
            }
            Request::UpdateApp { query, app_id } => {
                service.query(&query).map(|q| q.select_source(&app_id)).into()
            }
            Request::VoiceQuery { query } => service
                .query(&query)
                .and_then(|q| q.voice_query())
                .map(|(revision, text)| json!({ "revision": revision, "text": text }))
                .into(),
            Request::Close { query } => service.close_query(&query).into(),
            Request::ExecuteCommand { query, key, timestamp } => {
                service.query(&query).and_then(|q| q.execute_command(key, timestamp)).into()
            }
            Request::ExecuteParameterized { query, key, timestamp } => {
                service.query(&query).and_then(|q| q.execute_parameterized(key, timestamp)).into()
            }
            Request::ExecuteToolbar { query, item, timestamp } => {
                service.query(&query).and_then(|q| q.execute_toolbar(&item, timestamp)).into()
            }
            Request::GetResults { query } => service
                .query(&query)
                .map(|q| json!({ "revision": q.revision(), "results": q.results(), "toolbar": q.toolbar() }))
                .into(),
            Request::GetAppstack { query } => service
                .query(&query)
                .map(|q| json!({ "revision": q.revision(), "appstack": q.appstack() }))
                .into(),

            Request::AddSources { application, actions, menus } => {
                service.add_sources(&application, client.as_str(), &actions, &menus).into()
            }
            Request::SetWindowContext { application, window, context } => {
                service.set_window_context(&application, window, context.as_deref()).into()
            }

            Request::PublishMenu { path, items } => {
                self.bus.publish_menu(RemoteRef::new(client.as_str(), path), SimpleMenu::from_description(&items));
                Response::ok(())
            }
            Request::PublishActions { path, actions } => {
                let at = RemoteRef::new(client.as_str(), path);
                let group = SimpleActionGroup::with_actions(actions.iter().map(String::as_str));
                self.bus.publish_actions(at.clone(), group.clone());
                self.groups.borrow_mut().insert(at, group);
                Response::ok(())
            }
            Request::PublishLegacyMenu { path, items } => {
                self.bus.publish_legacy_menu(RemoteRef::new(client.as_str(), path), SimpleLegacyMenu::new(items));
                Response::ok(())
            }
            Request::SetActionEnabled { path, action, enabled } => {
                let at = RemoteRef::new(client.as_str(), path);
                let Some(group) = self.groups.borrow().get(&at).cloned() else {
                    return Response::invalid(format!("no action group published at {}", at.path));
                };
                group.set_enabled(&action, enabled);
                Response::ok(())
            }
            Request::NameVanished { name } => {
                self.client_gone(&name);
                Response::ok(())
            }

            Request::Subscribe { events } => {
                let state = self.server.read();
                for event in events {
                    state.subscribe_client(client, event);
                }
                Response::ok(state.subscriptions(client))
            }
            Request::Unsubscribe { events } => {
                let state = self.server.read();
                for event in &events {
                    state.unsubscribe_client(client, event);
                }
                Response::ok(state.subscriptions(client))
            }

            Request::WindowCreated { .. } | Request::WindowDestroyed { .. } | Request::WindowFocused { .. } => {
                Response::failed("focus event was not recognized")
            }
        }
    }
}

fn request_name(request: &Request) -> &'static str {
    match request {
        Request::CreateQuery { .. } => "create_query",
        Request::StartQuery { .. } => "start_query",
        Request::CloseQuery { .. } => "close_query",
        Request::ExecuteQuery { .. } => "execute_query",
        Request::RegisterApplication { .. } => "register_application",
        Request::GetOpenQueries => "get_open_queries",
        Request::GetApplications => "get_applications",
        Request::DumpApplication { .. } => "dump_application",
        Request::UpdateQuery { .. } => "update_query",
        Request::UpdateApp { .. } => "update_app",
        Request::VoiceQuery { .. } => "voice_query",
        Request::Close { .. } => "close",
        Request::ExecuteCommand { .. } => "execute_command",
        Request::ExecuteParameterized { .. } => "execute_parameterized",
        Request::ExecuteToolbar { .. } => "execute_toolbar",
        Request::GetResults { .. } => "get_results",
        Request::GetAppstack { .. } => "get_appstack",
        Request::AddSources { .. } => "add_sources",
        Request::SetWindowContext { .. } => "set_window_context",
        Request::WindowCreated { .. } => "window_created",
        Request::WindowDestroyed { .. } => "window_destroyed",
        Request::WindowFocused { .. } => "window_focused",
        Request::PublishMenu { .. } => "publish_menu",
        Request::PublishActions { .. } => "publish_actions",
        Request::PublishLegacyMenu { .. } => "publish_legacy_menu",
        Request::SetActionEnabled { .. } => "set_action_enabled",
        Request::NameVanished { .. } => "name_vanished",
        Request::Subscribe { .. } => "subscribe",
        Request::Unsubscribe { .. } => "unsubscribe",
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use tokio::sync::mpsc;

    use super::*;
    use crate::context::HudContext;
    use crate::ipc::ServerState;

    struct Fixture {
        reactor: Reactor,
        bus: Rc<LocalBus>,
        server: SharedServerState,
    }

    fn fixture() -> Fixture {
        let bus = LocalBus::new();
        let ctx = HudContext::in_memory(bus.clone());
        let service = HudService::new(&ctx, &[]);
        let server = ServerState::shared();
        let reactor = Reactor::new(service, bus.clone(), server.clone());
        Fixture { reactor, bus, server }
    }

    impl Fixture {
        fn call(&self, client: &ClientId, request: Value) -> Response {
            let request: Request = serde_json::from_value(request).unwrap();
            let (reply, mut rx) = oneshot::channel();
            assert!(self.reactor.handle_event(Event::Request { client: client.clone(), request, reply }));
            rx.try_recv().unwrap()
        }

        fn ok(&self, client: &ClientId, request: Value) -> Value {
            match self.call(client, request) {
                Response::Success { result } => result,
                Response::Error { error } => panic!("request failed: {error:?}"),
            }
        }

        /// A client that publishes an editor with a File menu.
        fn editor(&self, client: &ClientId) -> String {
            self.reactor.handle_event(Event::ClientConnected(client.clone()));
            self.ok(client, json!({"method": "publish_actions", "path": "/org/gnome/gedit", "actions": ["save", "quit"]}));
            self.ok(
                client,
                json!({
                    "method": "publish_menu",
                    "path": "/org/gnome/gedit/menus/menubar",
                    "items": [{"label": "File", "submenu": [
                        {"label": "Save", "action": "app.save", "accel": "<Control>s"},
                        {"label": "Quit", "action": "app.quit"},
                    ]}],
                }),
            );
            let path = self.ok(client, json!({"method": "register_application", "app_id": "gedit"}));
            let path = path.as_str().unwrap().to_string();
            self.ok(
                client,
                json!({
                    "method": "add_sources",
                    "application": path,
                    "actions": [{"window": 0, "prefix": "app", "path": "/org/gnome/gedit"}],
                    "menus": [{"window": 0, "path": "/org/gnome/gedit/menus/menubar"}],
                }),
            );
            self.ok(client, json!({"method": "window_focused", "window": 1, "app_id": "gedit"}));
            path
        }
    }

    #[test]
    fn query_lifecycle_over_requests() {
        let fx = fixture();
        let client = ClientId::nth(7);
        fx.editor(&client);

        let info = fx.ok(&client, json!({"method": "create_query", "search": "save"}));
        let path = info["path"].as_str().unwrap().to_string();
        assert_eq!(info["revision"], 0);
        main_loop::run_until_idle();

        let results = fx.ok(&client, json!({"method": "get_results", "query": path}));
        assert_eq!(results["revision"], 1);
        assert_eq!(results["results"][0]["command"], "Save");
        assert_eq!(results["results"][0]["shortcut"], "Ctrl + S");

        let key = results["results"][0]["id"].clone();
        fx.ok(&client, json!({"method": "execute_command", "query": path, "key": key, "timestamp": 5}));

        let revision = fx.ok(&client, json!({"method": "update_query", "query": path, "search": "quit"}));
        assert_eq!(revision, 2);
        fx.ok(&client, json!({"method": "close", "query": path}));
        assert_eq!(fx.ok(&client, json!({"method": "get_open_queries"})), json!([]));
    }

    #[test]
    fn errors_are_reported_to_the_caller() {
        let fx = fixture();
        let client = ClientId::nth(1);
        let response = fx.call(&client, json!({"method": "get_results", "query": "/nope"}));
        assert_eq!(response, Response::invalid("Unknown query /nope"));
        let response = fx.call(&client, json!({"method": "set_action_enabled", "path": "/a", "action": "x", "enabled": false}));
        assert!(response.is_error());
    }

    #[test]
    fn disconnect_closes_owned_queries_and_published_objects() {
        let fx = fixture();
        let client = ClientId::nth(3);
        fx.editor(&client);
        fx.ok(&client, json!({"method": "create_query", "search": ""}));
        assert!(fx.bus.has_owner(client.as_str()));

        assert!(fx.reactor.handle_event(Event::ClientDisconnected(client.clone())));
        assert!(!fx.bus.has_owner(client.as_str()));
        assert!(fx.reactor.service().open_queries().is_empty());
    }

    #[test]
    fn subscribers_get_tagged_events() {
        let fx = fixture();
        let client = ClientId::nth(2);
        let (tx, mut rx) = mpsc::unbounded_channel();
        fx.server.read().register_client(client.clone(), tx);
        fx.editor(&client);

        let subs = fx.ok(&client, json!({"method": "subscribe", "events": ["results_changed"]}));
        assert_eq!(subs, json!(["results_changed"]));
        let info = fx.ok(&client, json!({"method": "create_query", "search": "save"}));
        main_loop::run_until_idle();

        let line = rx.try_recv().unwrap();
        let event: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(event["event"], "results_changed");
        assert_eq!(event["query"], info["path"]);
        // appstack changes were not asked for
        while let Ok(line) = rx.try_recv() {
            assert!(line.contains(r#""event":"results_changed""#), "{line}");
        }
    }

    #[test]
    fn legacy_round_trip() {
        let fx = fixture();
        let client = ClientId::nth(4);
        fx.editor(&client);

        let started = fx.ok(&client, json!({"method": "start_query", "search": "quit", "entries": 5}));
        assert_eq!(started["target"], "quit");
        assert_eq!(started["suggestions"][0]["command"], "Quit");
        let key = started["suggestions"][0]["key"].clone();
        fx.ok(&client, json!({"method": "execute_query", "key": key, "timestamp": 0}));
        assert!(fx.reactor.service().open_queries().is_empty());
    }

    #[test]
    fn shutdown_stops_the_reactor() {
        let fx = fixture();
        assert!(fx.reactor.handle_event(Event::Tick));
        assert!(!fx.reactor.handle_event(Event::Shutdown));
    }
}
