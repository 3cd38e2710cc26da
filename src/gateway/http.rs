//! HTTP ルーティング
//!
//! サーバー実装（EspHttpServer）に依存しない形で、パスと応答内容を決めます。

use super::{api, GatewayController};
use crate::clock::WallClock;
use crate::display::StatusDisplay;
use crate::link::{LinkPort, TriggerTarget};
use log::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Index,
    StatusJson,
    Trigger(TriggerTarget),
    NotFound,
}

/// 登録するパスの一覧
pub const ROUTES: [(HttpMethod, &str); 5] = [
    (HttpMethod::Get, "/"),
    (HttpMethod::Get, "/api/status"),
    (HttpMethod::Post, "/trigger/rip"),
    (HttpMethod::Post, "/trigger/halloween"),
    (HttpMethod::Post, "/trigger/both"),
];

pub fn route(method: HttpMethod, path: &str) -> Route {
    // クエリ文字列は無視
    let path = path.split('?').next().unwrap_or(path);
    match (method, path) {
        (HttpMethod::Get, "/") => Route::Index,
        (HttpMethod::Get, "/api/status") => Route::StatusJson,
        (HttpMethod::Post, p) => p
            .strip_prefix("/trigger/")
            .and_then(TriggerTarget::from_route_name)
            .map(Route::Trigger)
            .unwrap_or(Route::NotFound),
        _ => Route::NotFound,
    }
}

/// 応答内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub location: Option<&'static str>,
    pub body: String,
}

impl Response {
    fn html(body: String) -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=utf-8",
            location: None,
            body,
        }
    }

    fn json(body: String) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            location: None,
            body,
        }
    }

    fn see_other(location: &'static str) -> Self {
        Self {
            status: 303,
            content_type: "text/plain",
            location: Some(location),
            body: String::new(),
        }
    }

    fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            location: None,
            body: body.to_string(),
        }
    }

    /// ヘッダー一覧（EspHttpServer の into_response に渡す形）
    pub fn headers(&self) -> Vec<(&'static str, &'static str)> {
        let mut headers = vec![("Content-Type", self.content_type)];
        if let Some(location) = self.location {
            headers.push(("Location", location));
        }
        headers
    }
}

/// ルートを処理して応答を作る
///
/// トリガーは送信に失敗しても 303 でトップに戻します（結果はログのみ）。
pub fn respond<P, C, D>(controller: &GatewayController<P, C, D>, route: Route) -> Response
where
    P: LinkPort,
    C: WallClock,
    D: StatusDisplay,
{
    let tz = controller.config().timezone;
    match route {
        Route::Index => {
            info!("HTTP GET /");
            Response::html(api::render_index(&controller.snapshot(), &tz))
        }
        Route::StatusJson => match api::render_status_json(&controller.snapshot(), &tz) {
            Ok(body) => Response::json(body),
            Err(e) => {
                error!("Failed to serialize status: {}", e);
                Response::status(500, "status unavailable")
            }
        },
        Route::Trigger(target) => {
            if let Err(e) = controller.trigger(target) {
                error!("Manual trigger {:?} failed: {}", target, e);
            }
            Response::see_other("/")
        }
        Route::NotFound => Response::status(404, "Not found"),
    }
}
