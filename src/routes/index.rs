use axum::response::Html;

const INDEX_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Object detection</title>
  <style>
    body { font-family: sans-serif; max-width: 48rem; margin: 2rem auto; padding: 0 1rem; }
    label { display: block; margin: 0.75rem 0 0.25rem; }
    #result img { max-width: 100%; margin-top: 1rem; }
    #error { color: #b00020; margin-top: 1rem; }
  </style>
</head>
<body>
  <h1>Object detection</h1>
  <p>Detects everyday objects from the COCO dataset (cars, people, dogs,
  bicycles and so on). Upload an image, pick a confidence threshold and
  press Run to see the detections drawn over the image.</p>
  <form id="detect-form">
    <label for="image">Image file (jpg or png)</label>
    <input type="file" id="image" name="image" accept=".jpg,.jpeg,.png" required>
    <label for="threshold">Confidence threshold</label>
    <input type="number" id="threshold" name="threshold" min="0" max="1" step="0.01" value="0.25">
    <p><button type="submit">Run</button></p>
  </form>
  <div id="error"></div>
  <div id="result"></div>
  <script>
    const form = document.getElementById("detect-form");
    form.addEventListener("submit", async (event) => {
      event.preventDefault();
      const error = document.getElementById("error");
      const result = document.getElementById("result");
      error.textContent = "";
      result.innerHTML = "";
      const response = await fetch("/detect", {
        method: "POST",
        body: new FormData(form),
      });
      if (!response.ok) {
        error.textContent = await response.text();
        return;
      }
      const img = document.createElement("img");
      img.src = URL.createObjectURL(await response.blob());
      img.alt = "Detection result";
      result.appendChild(img);
    });
  </script>
</body>
</html>
"#;

pub async fn index_page() -> Html<&'static str> {
    Html(INDEX_PAGE)
}
