use uuid::Uuid;

pub fn request_id() -> String {
    let s = Uuid::new_v4().simple().to_string();
    format!("req-{}", &s[..12])
}
