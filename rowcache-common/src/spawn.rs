// Copyright 2026 rowcache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::{runtime::Handle, task::JoinHandle};

use crate::error::{Error, ErrorKind, Result};

/// A wrapper for [`JoinHandle`] that maps join failures into [`Error`].
#[derive(Debug)]
pub struct SpawnHandle<T> {
    inner: JoinHandle<T>,
}

impl<T> SpawnHandle<T> {
    /// Abort the task.
    pub fn abort(&self) {
        self.inner.abort()
    }
}

impl<T> Future for SpawnHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Ready(Ok(v)) => Poll::Ready(Ok(v)),
            Poll::Ready(Err(e)) => Poll::Ready(Err(Error::new(ErrorKind::Join, "tokio join error").with_source(e))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A handle to the tokio runtime that background tasks are spawned on.
#[derive(Debug, Clone)]
pub struct Spawner {
    handle: Handle,
}

impl From<Handle> for Spawner {
    fn from(handle: Handle) -> Self {
        Self { handle }
    }
}

impl Spawner {
    /// Wrapper for [`Handle::spawn`].
    pub fn spawn<F>(&self, future: F) -> SpawnHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        SpawnHandle {
            inner: self.handle.spawn(future),
        }
    }

    /// Get the spawner of the current runtime.
    ///
    /// Returns a [`ErrorKind::Config`] error if called outside of a tokio runtime.
    pub fn try_current() -> Result<Self> {
        Handle::try_current().map(Self::from).map_err(|e| {
            Error::new(
                ErrorKind::Config,
                "no tokio runtime found, build the cache within a runtime or provide a spawner",
            )
            .with_source(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_current_outside_runtime() {
        let err = Spawner::try_current().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_spawn_and_join() {
        let spawner = Spawner::try_current().unwrap();
        let res = spawner.spawn(async { 1 + 1 }).await.unwrap();
        assert_eq!(res, 2);
    }

    #[tokio::test]
    async fn test_join_error() {
        let spawner = Spawner::try_current().unwrap();
        let handle = spawner.spawn(std::future::pending::<()>());
        handle.abort();
        let err = handle.await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Join);
    }
}
