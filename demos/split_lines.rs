use std::convert::Infallible;

use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use partflow::Split;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A line-based log, fragmented the way a socket might deliver it.
    let chunks = vec!["GET /a 200\r", "\nGET /b 4", "04\r\nPOST /c 201", "\r\nGET /d 200"];
    let stream = stream::iter(chunks.into_iter().map(|chunk| Ok::<_, Infallible>(Bytes::from(chunk))));

    let mut lines = Split::new(stream, "\r\n")?;

    while let Some(line) = lines.next().await {
        let mut line = line?;
        let idx = line.index();

        // Only the first chunk of every line is needed; dropping the segment
        // skips the rest of it.
        if let Some(head) = line.chunk().await? {
            println!("line {}: starts with {:?}", idx, head);
        }
    }

    Ok(())
}
