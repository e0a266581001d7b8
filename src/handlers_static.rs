use warp::Filter;

macro_rules! include_static {
    ($($path:expr),* $(,)?) => {
        &[
            $(($path, include_str!(concat!("../static/", $path)))),*
        ]
    };
}

const STATIC_FILES: &[(&str, &str)] = include_static!["studio.css", "print.css", "studio.js"];

fn content_type_from_path(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        _ => "text/plain",
    }
}

/// Looks up an embedded asset by its name under `/static/`.
pub fn find_asset(name: &str) -> Option<(&'static str, &'static str)> {
    STATIC_FILES
        .iter()
        .find(|(file, _)| *file == name)
        .map(|(file, content)| (*content, content_type_from_path(file)))
}

pub fn build_static_routes(
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("static")
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::get())
        .and_then(|name: String| async move {
            match find_asset(&name) {
                Some((content, content_type)) => Ok::<_, warp::Rejection>(
                    warp::reply::with_header(content, "content-type", content_type),
                ),
                None => Err(warp::reject::not_found()),
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_assets() {
        let (css, content_type) = find_asset("print.css").unwrap();
        assert_eq!(content_type, "text/css");
        assert!(css.contains("@page"));
        assert!(!css.contains("0.0625in"));

        assert_eq!(find_asset("studio.js").unwrap().1, "application/javascript");
        assert!(find_asset("../Cargo.toml").is_none());
    }
}
