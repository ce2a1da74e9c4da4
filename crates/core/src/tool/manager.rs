use std::collections::HashMap;
use std::sync::Arc;

use chainlet_model::{ModelTool, ToolCallRequest};

use crate::tool::object::{ApprovalHandler, ToolFuture, ToolObject, ToolObjectImpl};
use crate::tool::{Approval, Error, Tool};

/// An object that manages toolset and handles requests from the model.
///
/// Tools keep their registration order, which is also the order of
/// [`Manager::definitions`]. Registering a tool under an existing name
/// replaces it in place.
#[derive(Default)]
pub struct Manager {
    tools: Vec<Arc<dyn ToolObject>>,
    index: HashMap<String, usize>,
    on_request: Option<ApprovalHandler>,
}

impl Manager {
    /// Registers a tool.
    pub fn add_tool<T: Tool>(&mut self, tool: T) {
        let name = tool.name().to_owned();
        let tool: Arc<dyn ToolObject> = Arc::new(ToolObjectImpl(tool));
        match self.index.get(&name) {
            Some(&idx) => {
                warn!("replacing tool `{name}`");
                self.tools[idx] = tool;
            }
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Installs the handler that is asked to approve tool calls.
    #[inline]
    pub fn on_request<F: Fn(Approval) + Send + Sync + 'static>(
        &mut self,
        on_request: F,
    ) {
        self.on_request = Some(Box::new(on_request));
    }

    /// Returns `true` if no tool is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Returns the registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    /// Returns `(name, description)` for every registered tool.
    pub fn descriptions(&self) -> Vec<(&str, &str)> {
        self.tools
            .iter()
            .map(|tool| (tool.name(), tool.description()))
            .collect()
    }

    /// Returns the definitions of every registered tool.
    #[inline]
    pub fn definitions(&self) -> Vec<ModelTool> {
        self.tools
            .iter()
            .map(|tool| ModelTool {
                name: tool.name().to_owned(),
                description: tool.description().to_owned(),
                parameters: tool.parameter_schema().clone(),
            })
            .collect()
    }

    /// Starts a tool call.
    ///
    /// The approval handler (if any) is invoked before this returns; the
    /// tool itself runs when the returned future is polled. Unknown tools
    /// resolve to a [`NotFound`](crate::tool::ErrorKind::NotFound) error.
    pub fn dispatch(&self, req: ToolCallRequest) -> ToolFuture {
        let Some(&idx) = self.index.get(&req.name) else {
            warn!("tool not found: {}", req.name);
            return Box::pin(std::future::ready(Err(Error::not_found(&req.name))));
        };
        trace!("dispatching a tool ({}) with args: {:?}", req.id, req.arguments);
        Arc::clone(&self.tools[idx]).execute(req.arguments, self.on_request.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use std::future::ready;
    use std::sync::Mutex;

    use serde::Deserialize;
    use serde_json::{Value, json};

    use super::*;
    use crate::tool::{ErrorKind, ToolResult};

    static EMPTY_SCHEMA: &Value = &Value::Null;

    #[derive(Deserialize)]
    struct EchoInput {
        text: String,
    }

    struct EchoTool {
        name: &'static str,
        guarded: bool,
    }

    impl Tool for EchoTool {
        type Input = EchoInput;

        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "Echoes the text back."
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        fn make_approval(&self, input: &Self::Input) -> Option<Approval> {
            self.guarded
                .then(|| Approval::new(format!("echo {}", input.text), "testing"))
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            ready(Ok(input.text))
        }
    }

    fn request(name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: "tool:1".to_owned(),
            name: name.to_owned(),
            arguments,
        }
    }

    #[tokio::test]
    async fn test_dispatch() {
        let mut manager = Manager::default();
        manager.add_tool(EchoTool {
            name: "echo",
            guarded: false,
        });
        manager.add_tool(EchoTool {
            name: "guarded_echo",
            guarded: true,
        });
        assert_eq!(manager.names(), ["echo", "guarded_echo"]);
        assert_eq!(manager.definitions()[0].description, "Echoes the text back.");

        let result = manager.dispatch(request("echo", json!({ "text": "hi" }))).await;
        assert_eq!(result.unwrap(), "hi");

        // Without a handler every call is approved.
        let result = manager
            .dispatch(request("guarded_echo", json!({ "text": "hey" })))
            .await;
        assert_eq!(result.unwrap(), "hey");

        let err = manager.dispatch(request("echo", json!({}))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = manager
            .dispatch(request("read_tool", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_approval_flow() {
        let asked = Arc::new(Mutex::new(vec![]));
        let mut manager = Manager::default();
        manager.add_tool(EchoTool {
            name: "echo",
            guarded: true,
        });
        manager.on_request({
            let asked = Arc::clone(&asked);
            move |approval| {
                asked.lock().unwrap().push(approval.what().to_owned());
                match approval.what() {
                    "echo yes" => approval.approve(),
                    "echo no" => approval.reject(Some("not today".to_owned())),
                    _ => drop(approval),
                }
            }
        });

        let ok = manager.dispatch(request("echo", json!({ "text": "yes" }))).await;
        assert_eq!(ok.unwrap(), "yes");

        let err = manager
            .dispatch(request("echo", json!({ "text": "no" })))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(err.reason(), "not today");

        let err = manager
            .dispatch(request("echo", json!({ "text": "ignored" })))
            .await
            .unwrap_err();
        assert_eq!(err, Error::user_rejected());

        assert_eq!(*asked.lock().unwrap(), ["echo yes", "echo no", "echo ignored"]);
    }
}
