const TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
    <head>
        <title>Chat</title>
    </head>
    <body>
        <h1>WebSocket Chat</h1>
        <form id="join" onsubmit="connect(event)">
            <input type="text" id="name" placeholder="your name" autocomplete="off"/>
            <button>Join</button>
        </form>
        <form id="chat" onsubmit="sendMessage(event)" hidden>
            <input type="text" id="text" autocomplete="off"/>
            <button>Send</button>
        </form>
        <ul id="messages"></ul>
        <script>
            var ws = null;
            function connect(event) {
                event.preventDefault();
                var name = document.getElementById("name").value.trim();
                if (!name) {
                    return;
                }
                ws = new WebSocket("ws://{location}/ws/" + encodeURIComponent(name));
                ws.onmessage = function(event) {
                    var item = document.createElement("li");
                    item.appendChild(document.createTextNode(event.data));
                    document.getElementById("messages").appendChild(item);
                };
                ws.onclose = function() {
                    document.getElementById("chat").hidden = true;
                    document.getElementById("join").hidden = false;
                };
                document.getElementById("join").hidden = true;
                document.getElementById("chat").hidden = false;
            }
            function sendMessage(event) {
                event.preventDefault();
                var input = document.getElementById("text");
                if (ws && input.value) {
                    ws.send(input.value);
                }
                input.value = "";
            }
        </script>
    </body>
</html>
"#;

/// Landing page with the WebSocket address baked in.
pub fn render(location: &str) -> String {
    TEMPLATE.replace("{location}", location)
}
