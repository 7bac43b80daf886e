use std::panic::AssertUnwindSafe;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::join_all;
use crate::communication::Request;
use crate::error::BackendError;
use super::{Backend, ItemOutcome, Model};

/// Runs a [`Model`] once per request of a batch.
///
/// The calls of one batch run concurrently and their outcomes keep the batch
/// order. An error or panic in one call becomes that request's error only.
pub struct PerItem<M> {
    model: M,
}

impl<M> PerItem<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

#[async_trait]
impl<M> Backend for PerItem<M>
where M: Model
{
    type Output = M::Output;

    async fn invoke_batch(
        &self,
        batch: &[Request],
    ) -> Result<Vec<ItemOutcome<Self::Output>>, BackendError> {
        let calls = batch.iter().map(|request| {
            AssertUnwindSafe(self.model.invoke(request.payload(), request.params()))
                .catch_unwind()
                .map(flatten_caught::<M::Output>)
        });
        Ok(join_all(calls).await)
    }
}

/// Turns a caught panic into that item's error.
fn flatten_caught<O>(caught: std::thread::Result<ItemOutcome<O>>) -> ItemOutcome<O> {
    caught.unwrap_or_else(|panic| Err(BackendError::from_panic(panic)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::RequestId;
    use crate::params::GenerationParams;

    struct Shout;

    #[async_trait]
    impl Model for Shout {
        type Output = String;

        async fn invoke(&self, prompt: &str, params: &GenerationParams) -> Result<String, BackendError> {
            match prompt {
                "bad" => Err(BackendError::new("rejected prompt")),
                "panic" => panic!("model crashed"),
                _ => {
                    let suffix = params.get("suffix").and_then(|v| v.as_str()).unwrap_or("");
                    Ok(format!("{}{}", prompt.to_uppercase(), suffix))
                }
            }
        }
    }

    fn batch(prompts: &[&str]) -> Vec<Request> {
        prompts
            .iter()
            .map(|p| Request::new(RequestId::new(), *p, GenerationParams::new().with("suffix", "!")))
            .collect()
    }

    #[tokio::test]
    async fn test_outputs_follow_input_order() {
        let backend = PerItem::new(Shout);
        let outcomes = backend.invoke_batch(&batch(&["a", "b", "c"])).await.unwrap();
        assert_eq!(
            outcomes,
            vec![Ok("A!".to_string()), Ok("B!".to_string()), Ok("C!".to_string())]
        );
    }

    #[tokio::test]
    async fn test_failing_item_does_not_fail_siblings() {
        let backend = PerItem::new(Shout);
        let outcomes = backend.invoke_batch(&batch(&["a", "bad", "c"])).await.unwrap();

        assert_eq!(outcomes[0], Ok("A!".to_string()));
        assert_eq!(outcomes[1], Err(BackendError::new("rejected prompt")));
        assert_eq!(outcomes[2], Ok("C!".to_string()));
    }

    #[tokio::test]
    async fn test_panicking_item_is_isolated() {
        let backend = PerItem::new(Shout);
        let outcomes = backend.invoke_batch(&batch(&["panic", "b"])).await.unwrap();

        assert_eq!(outcomes[0], Err(BackendError::new("backend panicked: model crashed")));
        assert_eq!(outcomes[1], Ok("B!".to_string()));
    }
}
