use std::{convert::Infallible, net::SocketAddr};

use bytes::Bytes;
use futures_util::StreamExt;
use http_body_util::{BodyStream, Full};
use hyper::{body::Incoming, Request, Response, StatusCode};
use partflow::Multipart;

// A handler for incoming requests.
async fn handle(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    // Find the boundary among the request headers.
    let boundary = partflow::boundary_from_headers(
        req.headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str(), value))),
    );

    let boundary = match boundary {
        Ok(boundary) => boundary,
        Err(err) => {
            return Ok(Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(Full::from(format!("BAD REQUEST: {}", err)))
                .unwrap());
        }
    };

    match process_multipart(req.into_body(), boundary).await {
        Ok(summary) => Ok(Response::new(Full::from(summary))),
        Err(err) => Ok(Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Full::from(format!("INTERNAL SERVER ERROR: {}", err)))
            .unwrap()),
    }
}

// Consumes every part on its own task, at its own pace.
async fn process_multipart(body: Incoming, boundary: String) -> partflow::Result<String> {
    let body_stream = BodyStream::new(body)
        .filter_map(|result| async move { result.map(|frame| frame.into_data().ok()).transpose() });

    let mut multipart = Multipart::new(body_stream, boundary);
    let mut tasks = Vec::new();

    while let Some(part) = multipart.next_part().await? {
        println!(
            "Name: {:?}, FileName: {:?}, Content-Type: {:?}",
            part.name(),
            part.file_name(),
            part.content_type()
        );

        let name = part.name().unwrap_or("<unnamed>").to_owned();
        tasks.push(tokio::spawn(async move {
            let mut body = part.body();
            let mut len = 0;
            while let Some(chunk) = body.chunk().await? {
                len += chunk.len();
            }
            partflow::Result::Ok(format!("{}: {} bytes", name, len))
        }));
    }

    let mut lines = Vec::new();
    for task in tasks {
        match task.await {
            Ok(line) => lines.push(line?),
            Err(err) => lines.push(format!("part task failed: {}", err)),
        }
    }

    multipart.completed().await?;
    Ok(lines.join("\n"))
}

#[tokio::main]
async fn main() {
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    println!("Server running at: {}", addr);

    let service = hyper::service::service_fn(handle);

    loop {
        let (socket, _remote_addr) = listener.accept().await.unwrap();
        let socket = hyper_util::rt::TokioIo::new(socket);
        tokio::spawn(async move {
            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(socket, service)
                .await
            {
                eprintln!("server error: {}", e);
            }
        });
    }
}
