//! Progress/status reporting, supplementing the distilled spec with the

// Copyright (c) 2023 Yan Ka, Chiu.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions
// are met:
// 1. Redistributions of source code must retain the above copyright
//    notice, this list of conditions, and the following disclaimer,
//    without modification, immediately at the beginning of the file.
// 2. The name of the author may not be used to endorse or promote products
//    derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE AUTHOR AND CONTRIBUTORS ``AS IS'' AND
// ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
// IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE
// ARE DISCLAIMED. IN NO EVENT SHALL THE AUTHOR OR CONTRIBUTORS BE LIABLE FOR
// ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
// DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS
// OR SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION)
// HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT
// LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY
// OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF
// SUCH DAMAGE.

//! original's per-line status messages (e.g. "Pulling X from S3...").

use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone)]
pub enum SyncEvent {
    Progress(String),
    Error(String),
}

/// A thin wrapper so callers that don't care about progress can pass `None`
/// without every call site matching on `Option<&UnboundedSender<_>>`.
#[derive(Clone)]
pub struct ProgressSink(UnboundedSender<SyncEvent>);

impl ProgressSink {
    pub fn new(sender: UnboundedSender<SyncEvent>) -> ProgressSink {
        ProgressSink(sender)
    }

    pub fn emit(&self, event: SyncEvent) {
        // A dropped receiver just means nobody's watching; not an error
        // the sync engine should ever surface.
        let _ = self.0.send(event);
    }
}
