use axum::response::Html;

pub async fn index() -> Html<&'static str> {
    Html(
        r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Photo Restore</title>
    <style>
        * {
            margin: 0;
            padding: 0;
            box-sizing: border-box;
        }

        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Oxygen, Ubuntu, Cantarell, sans-serif;
            background: linear-gradient(135deg, #3a4a5e 0%, #8a6f4d 100%);
            min-height: 100vh;
            display: flex;
            align-items: center;
            justify-content: center;
            padding: 20px;
        }

        .container {
            background: white;
            border-radius: 20px;
            box-shadow: 0 20px 60px rgba(0,0,0,0.3);
            max-width: 960px;
            width: 100%;
            padding: 40px;
        }

        h1 {
            color: #333;
            margin-bottom: 10px;
            font-size: 2em;
        }

        .subtitle {
            color: #666;
            margin-bottom: 24px;
            font-size: 0.9em;
        }

        .modes {
            display: flex;
            gap: 10px;
            margin-bottom: 20px;
        }

        .mode {
            flex: 1;
            padding: 10px;
            border-radius: 10px;
            border: 2px solid #8a6f4d;
            background: white;
            color: #8a6f4d;
            font-weight: 600;
            cursor: pointer;
        }

        .mode.active {
            background: #8a6f4d;
            color: white;
        }

        .prompt {
            width: 100%;
            padding: 12px;
            border-radius: 10px;
            border: 2px solid #ddd;
            margin-bottom: 20px;
            font-size: 1em;
            display: none;
        }

        .upload-area {
            border: 3px dashed #8a6f4d;
            border-radius: 15px;
            padding: 60px 20px;
            text-align: center;
            cursor: pointer;
            background: #faf7f2;
        }

        .upload-area.dragover {
            background: #f1e9dc;
        }

        .upload-text {
            color: #8a6f4d;
            font-size: 1.2em;
            font-weight: 600;
            margin-bottom: 10px;
        }

        .upload-hint {
            color: #999;
            font-size: 0.9em;
        }

        input[type="file"] {
            display: none;
        }

        .loading, .error, .compare {
            display: none;
            margin-top: 20px;
        }

        .loading {
            text-align: center;
            color: #666;
        }

        .error {
            background: #fee;
            border: 2px solid #fcc;
            color: #c33;
            padding: 15px;
            border-radius: 10px;
        }

        .compare {
            gap: 20px;
        }

        .compare figure {
            flex: 1;
        }

        .compare img {
            width: 100%;
            border-radius: 10px;
            box-shadow: 0 4px 15px rgba(0,0,0,0.1);
        }

        .compare figcaption {
            color: #666;
            font-size: 0.85em;
            text-transform: uppercase;
            letter-spacing: 1px;
            margin-top: 8px;
        }
    </style>
</head>
<body>
    <div class="container">
        <h1>Photo Restore</h1>
        <p class="subtitle">Restore old photographs or edit them with a prompt. Two free tries of each without signing in.</p>

        <div class="modes">
            <button class="mode active" data-mode="restore">Restore</button>
            <button class="mode" data-mode="edit">Edit</button>
        </div>

        <input class="prompt" id="prompt" type="text" placeholder="Describe the edit, e.g. &quot;colorize this photo&quot;">

        <div class="upload-area" id="uploadArea">
            <div class="upload-text">Click or drag a photo here</div>
            <div class="upload-hint">JPG, PNG or WebP</div>
            <input type="file" id="fileInput" accept="image/*">
        </div>

        <div class="loading" id="loading">Working on it... <span id="progress">0</span>%</div>
        <div class="error" id="error"></div>

        <div class="compare" id="compare">
            <figure><img id="before" alt="Original"><figcaption>Original</figcaption></figure>
            <figure><img id="after" alt="Result"><figcaption id="afterLabel">Restored</figcaption></figure>
        </div>
    </div>

    <script>
        let mode = 'restore';
        const uploadArea = document.getElementById('uploadArea');
        const fileInput = document.getElementById('fileInput');
        const promptInput = document.getElementById('prompt');
        const loading = document.getElementById('loading');
        const progress = document.getElementById('progress');
        const errorDiv = document.getElementById('error');
        const compare = document.getElementById('compare');

        document.querySelectorAll('.mode').forEach((button) => {
            button.addEventListener('click', () => {
                document.querySelectorAll('.mode').forEach((b) => b.classList.remove('active'));
                button.classList.add('active');
                mode = button.dataset.mode;
                promptInput.style.display = mode === 'edit' ? 'block' : 'none';
                document.getElementById('afterLabel').textContent = mode === 'edit' ? 'Edited' : 'Restored';
            });
        });

        uploadArea.addEventListener('click', () => fileInput.click());
        uploadArea.addEventListener('dragover', (e) => {
            e.preventDefault();
            uploadArea.classList.add('dragover');
        });
        uploadArea.addEventListener('dragleave', () => uploadArea.classList.remove('dragover'));
        uploadArea.addEventListener('drop', (e) => {
            e.preventDefault();
            uploadArea.classList.remove('dragover');
            const file = e.dataTransfer.files[0];
            if (file && file.type.startsWith('image/')) {
                handleFile(file);
            }
        });
        fileInput.addEventListener('change', (e) => {
            const file = e.target.files[0];
            if (file) {
                handleFile(file);
            }
        });

        function readAsDataUrl(file) {
            return new Promise((resolve, reject) => {
                const reader = new FileReader();
                reader.onload = () => resolve(reader.result);
                reader.onerror = reject;
                reader.readAsDataURL(file);
            });
        }

        function showError(message) {
            errorDiv.textContent = message;
            errorDiv.style.display = 'block';
        }

        async function handleFile(file) {
            const prompt = promptInput.value.trim();
            if (mode === 'edit' && !prompt) {
                showError('Describe the edit first.');
                return;
            }

            const inputImage = await readAsDataUrl(file);
            document.getElementById('before').src = inputImage;
            errorDiv.style.display = 'none';
            compare.style.display = 'none';
            loading.style.display = 'block';

            // Cosmetic only; the server reports no real progress.
            let ticks = 0;
            const timer = setInterval(() => {
                ticks = Math.min(ticks + 3, 95);
                progress.textContent = ticks;
            }, 400);

            try {
                const body = mode === 'edit' ? { inputImage, prompt } : { inputImage };
                const response = await fetch('/api/' + mode, {
                    method: 'POST',
                    headers: { 'Content-Type': 'application/json' },
                    body: JSON.stringify(body),
                });
                const result = await response.json();

                if (response.status === 403) {
                    throw new Error(result.error + ' Sign in to keep going.');
                }
                if (!response.ok) {
                    throw new Error(result.error || 'Request failed');
                }

                document.getElementById('after').src = result.output;
                compare.style.display = 'flex';
            } catch (error) {
                showError('Error: ' + error.message);
            } finally {
                clearInterval(timer);
                loading.style.display = 'none';
            }
        }
    </script>
</body>
</html>
        "#,
    )
}
