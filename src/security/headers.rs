//! Security headers for HTTP responses
//!
//! Every reply the API produces, including rejections and OAuth redirects,
//! passes through [`with_api_security_headers`].

use warp::http::HeaderValue;
use warp::reply::Response;
use warp::Reply;

/// Add the API security headers to an already built response
pub fn add_security_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();

    // Prevent MIME type sniffing
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));

    // Prevent clickjacking
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));

    // Redirects to the provider carry the state nonce; never leak it via Referer
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));

    // Token-bearing bodies must not be cached anywhere
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));

    headers.remove("Server");

    response
}

/// Wrap a reply with the API security headers
pub fn with_api_security_headers<T: Reply>(reply: T) -> Response {
    add_security_headers(reply.into_response())
}
