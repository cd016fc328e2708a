use bord::config::Settings;
use bord::core::context::AppContext;
use bord::core::db::MemoryStore;
use bord::handlers::route;
use serde_json::{json, Value};
use spin_sdk::http::{Method, Request, Response};

const BOUNDARY: &str = "bord-test-boundary";

struct Harness {
    ctx: AppContext,
    store: MemoryStore,
}

impl Harness {
    fn new() -> Self {
        let store = MemoryStore::new();
        let settings = Settings {
            secret_key: "integration-secret".to_string(),
            token_expiration_hours: 24,
            public_base_url: String::new(),
        };
        Self {
            ctx: AppContext::in_memory(store.clone(), settings),
            store,
        }
    }

    fn send(&self, method: Method, path: &str, cookie: Option<&str>, content_type: Option<&str>, body: Vec<u8>) -> Response {
        let mut builder = Request::builder();
        builder.method(method).uri(path);
        if let Some(cookie) = cookie {
            builder.header("Cookie", cookie);
        }
        if let Some(content_type) = content_type {
            builder.header("Content-Type", content_type);
        }
        route(&self.ctx, builder.body(body).build())
    }

    fn get(&self, path: &str, cookie: Option<&str>) -> Response {
        self.send(Method::Get, path, cookie, None, Vec::new())
    }

    fn post_json(&self, path: &str, cookie: Option<&str>, body: Value) -> Response {
        self.send(Method::Post, path, cookie, Some("application/json"), body.to_string().into_bytes())
    }

    fn register(&self, name: &str) {
        let resp = self.post_json(
            "/api/v1/user/register",
            None,
            json!({ "username": name, "email": format!("{}@example.com", name), "password": "secret" }),
        );
        assert_eq!(*resp.status(), 201, "register {}: {:?}", name, body_json(&resp));
    }

    /// Logs in and returns (cookie, user id).
    fn login(&self, name: &str) -> (String, String) {
        let resp = self.post_json(
            "/api/v1/user/login",
            None,
            json!({ "email": format!("{}@example.com", name), "password": "secret" }),
        );
        assert_eq!(*resp.status(), 200);
        let cookie = set_cookie(&resp).expect("login sets a cookie");
        let pair = cookie.split(';').next().unwrap_or_default().to_string();
        let id = body_json(&resp)["user"]["id"].as_str().unwrap().to_string();
        (pair, id)
    }

    fn add_post(&self, cookie: &str, caption: &str) -> Value {
        let resp = self.send(
            Method::Post,
            "/api/v1/post/addpost",
            Some(cookie),
            Some(format!("multipart/form-data; boundary={}", BOUNDARY).as_str()),
            multipart_post(caption, &png(40, 20)),
        );
        assert_eq!(*resp.status(), 201, "{:?}", body_json(&resp));
        body_json(&resp)["post"].clone()
    }
}

fn body_json(resp: &Response) -> Value {
    serde_json::from_slice(resp.body()).unwrap_or(Value::Null)
}

fn header(resp: &Response, name: &str) -> Option<String> {
    resp.headers()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| String::from_utf8_lossy(value.as_ref()).to_string())
}

fn set_cookie(resp: &Response) -> Option<String> {
    header(resp, "set-cookie")
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(width, height, image::Rgba([10, 120, 200, 255])));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

fn multipart_post(caption: &str, image: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"caption\"\r\n\r\n{caption}\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"photo.png\"\r\n\
             Content-Type: image/png\r\n\r\n",
            b = BOUNDARY,
            caption = caption
        )
        .as_bytes(),
    );
    body.extend_from_slice(image);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

#[test]
fn health_route_answers() {
    let h = Harness::new();
    let resp = h.get("/", None);
    assert_eq!(*resp.status(), 200);
    assert_eq!(body_json(&resp)["success"], true);
}

#[test]
fn test_full_post_flow() {
    let h = Harness::new();

    // 1. Accounts
    h.register("anna");
    h.register("bert");
    let (anna, anna_id) = h.login("anna");
    let (bert, _) = h.login("bert");

    // 2. Post with an image
    let post = h.add_post(&anna, "first light");
    let post_id = post["id"].as_str().unwrap().to_string();
    assert_eq!(post["caption"], "first light");
    assert_eq!(post["author"]["username"], "anna");
    assert!(post["author"].get("password").is_none());

    let image_url = post["image"].as_str().unwrap().to_string();
    let media = h.get(&image_url, None);
    assert_eq!(*media.status(), 200);
    assert_eq!(header(&media, "content-type").as_deref(), Some("image/jpeg"));
    assert_eq!(&media.body()[..2], &[0xFF, 0xD8]);

    // 3. Reactions
    let resp = h.get(&format!("/api/v1/post/{}/like", post_id), Some(&bert));
    assert_eq!(*resp.status(), 200);
    let resp = h.post_json(&format!("/api/v1/post/{}/comment", post_id), Some(&bert), json!({ "text": "nice" }));
    assert_eq!(*resp.status(), 201);
    assert_eq!(body_json(&resp)["comment"]["author"]["username"], "bert");

    let feed = body_json(&h.get("/api/v1/post/all", Some(&bert)));
    let first = &feed["posts"][0];
    assert_eq!(first["id"], post_id.as_str());
    assert_eq!(first["likes"].as_array().unwrap().len(), 1);
    assert_eq!(first["comments"][0]["text"], "nice");

    let comments = body_json(&h.get(&format!("/api/v1/post/{}/comment/all", post_id), Some(&anna)));
    assert_eq!(comments["comments"].as_array().unwrap().len(), 1);

    // 4. Bookmark toggles
    let path = format!("/api/v1/post/{}/bookmark", post_id);
    assert_eq!(body_json(&h.get(&path, Some(&bert)))["type"], "saved");
    assert_eq!(body_json(&h.get(&path, Some(&bert)))["type"], "unsaved");

    // 5. Only the author may delete
    let delete_path = format!("/api/v1/post/delete/{}", post_id);
    let resp = h.send(Method::Delete, &delete_path, Some(&bert), None, Vec::new());
    assert_eq!(*resp.status(), 403);

    let resp = h.send(Method::Delete, &delete_path, Some(&anna), None, Vec::new());
    assert_eq!(*resp.status(), 200);
    assert!(h.store.keys_with_prefix("post:").is_empty());
    assert!(h.store.keys_with_prefix("comment:").is_empty());

    let mine = body_json(&h.get("/api/v1/post/userpost/all", Some(&anna)));
    assert!(mine["posts"].as_array().unwrap().is_empty());
    let profile = body_json(&h.get(&format!("/api/v1/user/{}/profile", anna_id), Some(&bert)));
    assert!(profile["user"]["posts"].as_array().unwrap().is_empty());

    let resp = h.get(&format!("/api/v1/post/{}/like", post_id), Some(&bert));
    assert_eq!(*resp.status(), 404);
}

#[test]
fn protected_routes_require_a_session() {
    let h = Harness::new();
    for path in [
        "/api/v1/post/all",
        "/api/v1/user/suggested",
        "/api/v1/post/userpost/all",
        "/api/v1/message/all/00000000-0000-0000-0000-000000000000",
    ] {
        let resp = h.get(path, None);
        assert_eq!(*resp.status(), 401, "{}", path);
        assert_eq!(body_json(&resp)["success"], false);
    }

    let resp = h.get("/api/v1/post/all", Some("token=not-a-jwt"));
    assert_eq!(*resp.status(), 401);
    assert_eq!(*h.get("/api/v1/nowhere", None).status(), 404);
}

#[test]
fn bearer_header_is_accepted() {
    let h = Harness::new();
    h.register("anna");
    let (cookie, _) = h.login("anna");
    let token = cookie.trim_start_matches("token=");

    let mut builder = Request::builder();
    builder
        .method(Method::Get)
        .uri("/api/v1/post/all")
        .header("Authorization", format!("Bearer {}", token));
    let resp = route(&h.ctx, builder.body(Vec::new()).build());
    assert_eq!(*resp.status(), 200);
}

#[test]
fn login_failures_are_indistinguishable() {
    let h = Harness::new();
    h.register("anna");

    let wrong_password = h.post_json(
        "/api/v1/user/login",
        None,
        json!({ "email": "anna@example.com", "password": "nope" }),
    );
    let unknown_email = h.post_json(
        "/api/v1/user/login",
        None,
        json!({ "email": "ghost@example.com", "password": "nope" }),
    );

    assert_eq!(*wrong_password.status(), 401);
    assert_eq!(*unknown_email.status(), 401);
    assert_eq!(wrong_password.body(), unknown_email.body());
    assert!(set_cookie(&wrong_password).is_none());
}

#[test]
fn duplicate_registration_conflicts() {
    let h = Harness::new();
    h.register("anna");
    let resp = h.post_json(
        "/api/v1/user/register",
        None,
        json!({ "username": "someone", "email": "ANNA@example.com", "password": "secret" }),
    );
    assert_eq!(*resp.status(), 409);

    let resp = h.post_json("/api/v1/user/register", None, json!({ "username": "x" }));
    assert_eq!(*resp.status(), 400);
}

#[test]
fn logout_clears_the_cookie() {
    let h = Harness::new();
    let resp = h.post_json("/api/v1/user/logout", None, json!({}));
    assert_eq!(*resp.status(), 200);
    let cookie = set_cookie(&resp).unwrap();
    assert!(cookie.starts_with("token=;"));
    assert!(cookie.contains("Max-Age=0"));
}

#[test]
fn follow_then_unfollow() {
    let h = Harness::new();
    h.register("anna");
    h.register("bert");
    let (anna, anna_id) = h.login("anna");
    let (_, bert_id) = h.login("bert");

    let path = format!("/api/v1/user/followorunfollow/{}", bert_id);
    assert_eq!(body_json(&h.post_json(&path, Some(&anna), json!({})))["type"], "followed");

    let bert_profile = body_json(&h.get(&format!("/api/v1/user/{}/profile", bert_id), Some(&anna)));
    assert_eq!(bert_profile["user"]["followers"], json!([anna_id]));

    assert_eq!(body_json(&h.post_json(&path, Some(&anna), json!({})))["type"], "unfollowed");
    let bert_profile = body_json(&h.get(&format!("/api/v1/user/{}/profile", bert_id), Some(&anna)));
    assert_eq!(bert_profile["user"]["followers"], json!([]));

    let own = format!("/api/v1/user/followorunfollow/{}", anna_id);
    assert_eq!(*h.post_json(&own, Some(&anna), json!({})).status(), 400);
}

#[test]
fn messages_flow_both_ways() {
    let h = Harness::new();
    h.register("anna");
    h.register("bert");
    h.register("cleo");
    let (anna, anna_id) = h.login("anna");
    let (bert, bert_id) = h.login("bert");
    let (_, cleo_id) = h.login("cleo");

    let resp = h.post_json(&format!("/api/v1/message/send/{}", bert_id), Some(&anna), json!({ "message": "hi" }));
    assert_eq!(*resp.status(), 201);
    assert_eq!(body_json(&resp)["newMessage"]["senderId"], anna_id.as_str());

    let resp = h.post_json(&format!("/api/v1/message/send/{}", anna_id), Some(&bert), json!({ "message": "hey" }));
    assert_eq!(*resp.status(), 201);

    let history = body_json(&h.get(&format!("/api/v1/message/all/{}", anna_id), Some(&bert)));
    let texts: Vec<&str> = history["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["message"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["hi", "hey"]);
    assert_eq!(h.store.keys_with_prefix("conversation:").len(), 1);

    let empty = body_json(&h.get(&format!("/api/v1/message/all/{}", cleo_id), Some(&anna)));
    assert_eq!(empty["messages"], json!([]));
}
