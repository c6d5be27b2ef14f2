use log::warn;
use std::collections::BTreeMap;
use std::sync::Arc;

use actix_web::{HttpRequest, HttpResponse, Responder, guard, http::Method, web};
use actix_ws::{Message, MessageStream, Session};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::error::AppError;
use crate::monitor::PulseEvent;
use crate::service::{PinReport, PulseCounterService};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PulseCounterService>,
}

async fn handle_event_websocket(
    mut session: Session,
    mut client_stream: MessageStream,
    rx: broadcast::Receiver<PulseEvent>,
    pin_filter: Option<String>,
) {
    let mut events = BroadcastStream::new(rx);

    loop {
        tokio::select! {
            msg = client_stream.recv() => {
                let Some(msg) = msg else { break; };

                match msg {
                    Ok(Message::Ping(bytes)) => {
                        let _ = session.pong(&bytes).await;
                    }
                    Ok(Message::Close(reason)) => {
                        let _ = session.close(reason).await;
                        break;
                    }
                    Ok(Message::Text(_))
                    | Ok(Message::Binary(_))
                    | Ok(Message::Pong(_))
                    | Ok(Message::Continuation(_))
                    | Ok(Message::Nop) => {}
                    Err(_) => break,
                }
            }
            event = events.next() => {
                let Some(event) = event else { break; };

                match event {
                    Ok(event) => {
                        if pin_filter.as_ref().is_none_or(|p| *p == event.pin)
                            && let Ok(text) = serde_json::to_string(&event)
                            && session.text(text).await.is_err()
                        {
                            warn!("WebSocket client disconnected");
                            break;
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        let notice = AppError::InvalidState(format!("Event stream lagged by {n} messages"));
                        if session.text(notice.to_string()).await.is_err() {
                            warn!("WebSocket client lagged and disconnected");
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl AppState {
    pub fn api_scope(&self, base_path: &str) -> actix_web::Scope {
        web::scope(base_path)
            .service(
                web::resource("/pins")
                    .route(web::get().to(list_pins))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/pins/events")
                    .route(web::get().to(events_ws_all))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/pin/{name}")
                    .route(web::get().to(pin_report))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/pin/{name}/value")
                    .route(web::get().to(get_value))
                    .route(web::post().to(set_value))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET, Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/pin/{name}/events")
                    .route(web::get().to(events_ws_pin))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
    }
}

async fn list_pins(state: web::Data<AppState>) -> Result<impl Responder, AppError> {
    let pins: BTreeMap<String, PinReport> = state
        .service
        .report()
        .into_iter()
        .map(|report| (report.name.clone(), report))
        .collect();

    Ok(web::Json(pins))
}

async fn pin_report(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<impl Responder, AppError> {
    let name = parse_pin_name(&req)?;
    let report = state.service.pin_report(name)?;

    Ok(web::Json(report))
}

async fn get_value(req: HttpRequest, state: web::Data<AppState>) -> Result<impl Responder, AppError> {
    let name = parse_pin_name(&req)?;
    let value = state.service.read_value(name)?;

    Ok(web::Json(u8::from(value)))
}

async fn set_value(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<impl Responder, AppError> {
    let name = parse_pin_name(&req)?;
    let value = parse_value_payload(&body)?;

    state.service.write_value(name, value)?;

    Ok(HttpResponse::Ok())
}

async fn events_ws_all(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    start_event_websocket(&req, stream, &state, None)
}

async fn events_ws_pin(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let name = parse_pin_name(&req)?;
    state.service.pin_report(name)?;

    start_event_websocket(&req, stream, &state, Some(name.to_string()))
}

fn start_event_websocket(
    req: &HttpRequest,
    stream: web::Payload,
    state: &AppState,
    pin_filter: Option<String>,
) -> Result<HttpResponse, AppError> {
    let rx = state.service.subscribe();
    let (response, session, client_stream) = actix_ws::handle(req, stream)
        .map_err(|e| AppError::InvalidState(format!("Websocket error: {e}")))?;

    actix_web::rt::spawn(async move {
        handle_event_websocket(session, client_stream, rx, pin_filter).await;
    });

    Ok(response)
}

fn parse_value_payload(body: &[u8]) -> Result<bool, AppError> {
    if body.is_empty() {
        return Err(AppError::InvalidValue("Empty value payload".into()));
    }

    match std::str::from_utf8(body).map(str::trim) {
        Ok("0") => Ok(false),
        Ok("1") => Ok(true),
        Ok(_) => Err(AppError::InvalidValue("Value must be 0 or 1".into())),
        Err(_) => Err(AppError::InvalidValue(
            "Value payload must be valid UTF-8".into(),
        )),
    }
}

fn parse_pin_name(req: &HttpRequest) -> Result<&str, AppError> {
    req.match_info()
        .get("name")
        .ok_or_else(|| AppError::InvalidValue("Missing pin name".into()))
}

async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}

fn guard_not_methods(methods: &[Method]) -> impl guard::Guard {
    let allowed: Vec<Method> = methods.to_vec();
    guard::fn_guard(move |ctx| !allowed.iter().any(|m| m == ctx.head().method))
}
